//! Reachability probing of a single candidate URL.

mod http;

pub use http::HttpProbe;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::error::ProbeError;
use crate::media::Credentials;

/// Result of probing one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint answered a lightweight existence check with success.
    Reachable,
    Unreachable(ProbeError),
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }

    pub fn error(&self) -> Option<&ProbeError> {
        match self {
            ProbeOutcome::Reachable => None,
            ProbeOutcome::Unreachable(err) => Some(err),
        }
    }
}

impl From<ProbeError> for ProbeOutcome {
    fn from(err: ProbeError) -> Self {
        ProbeOutcome::Unreachable(err)
    }
}

/// Decides whether a URL currently serves a playable stream.
///
/// Implementations perform exactly one round trip per call, never retry,
/// and must return by `deadline`: an elapsed deadline is reported as a
/// timeout network failure. Every failure is classified; nothing escapes
/// as an unhandled error.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
        deadline: Instant,
    ) -> ProbeOutcome;
}
