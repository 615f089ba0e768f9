use std::collections::BTreeMap;
use std::sync::Arc;

use url::Url;

use crate::error::{NoStreamAvailable, ProbeError};
use crate::media::FormatTag;
use crate::probe::ProbeOutcome;

/// Outcome of a completed verification run.
///
/// Every candidate of the descriptor appears exactly once, either in
/// [`verified_streams`](Self::verified_streams) or in
/// [`stream_errors`](Self::stream_errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    verified_streams: BTreeMap<FormatTag, Url>,
    stream_errors: BTreeMap<FormatTag, ProbeError>,
    overall_error: Option<NoStreamAvailable>,
}

impl VerificationResult {
    pub(crate) fn new(
        verified_streams: BTreeMap<FormatTag, Url>,
        stream_errors: BTreeMap<FormatTag, ProbeError>,
    ) -> Self {
        let overall_error = verified_streams
            .is_empty()
            .then(|| NoStreamAvailable::new(stream_errors.clone()));
        Self {
            verified_streams,
            stream_errors,
            overall_error,
        }
    }

    pub fn verified_streams(&self) -> &BTreeMap<FormatTag, Url> {
        &self.verified_streams
    }

    pub fn stream_errors(&self) -> &BTreeMap<FormatTag, ProbeError> {
        &self.stream_errors
    }

    /// Present only when no candidate was reachable.
    pub fn overall_error(&self) -> Option<&NoStreamAvailable> {
        self.overall_error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.overall_error.is_none()
    }

    pub fn into_streams(self) -> Result<BTreeMap<FormatTag, Url>, NoStreamAvailable> {
        match self.overall_error {
            Some(err) => Err(err),
            None => Ok(self.verified_streams),
        }
    }
}

/// Terminal notification of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Completed(Arc<VerificationResult>),
    Cancelled,
}

impl Completion {
    pub fn result(&self) -> Option<&Arc<VerificationResult>> {
        match self {
            Completion::Completed(result) => Some(result),
            Completion::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Completion::Cancelled)
    }
}

/// Per-candidate outcome, broadcast as soon as it is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEvent {
    pub tag: FormatTag,
    pub outcome: ProbeOutcome,
}

/// Collects probe outcomes until every expected candidate has reported.
///
/// Aggregation is keyed by tag, so the final result does not depend on the
/// order outcomes arrive in.
#[derive(Debug)]
pub(crate) struct ResultAggregator {
    expected: usize,
    verified: BTreeMap<FormatTag, Url>,
    errors: BTreeMap<FormatTag, ProbeError>,
}

impl ResultAggregator {
    pub(crate) fn new(expected: usize) -> Self {
        Self {
            expected,
            verified: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    /// Record one outcome. A tag that already reported is ignored.
    pub(crate) fn record(&mut self, tag: FormatTag, url: &Url, outcome: ProbeOutcome) {
        if self.verified.contains_key(&tag) || self.errors.contains_key(&tag) {
            return;
        }
        match outcome {
            ProbeOutcome::Reachable => {
                self.verified.insert(tag, url.clone());
            }
            ProbeOutcome::Unreachable(err) => {
                self.errors.insert(tag, err);
            }
        }
    }

    pub(crate) fn reported(&self) -> usize {
        self.verified.len() + self.errors.len()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.reported() >= self.expected
    }

    pub(crate) fn finish(self) -> VerificationResult {
        VerificationResult::new(self.verified, self.errors)
    }
}
