//! Concurrent verification of every candidate of one media descriptor.

mod result;
mod state;

pub use result::{CandidateEvent, Completion, VerificationResult};
pub use state::OperationState;

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use crate::config::VerifierConfig;
use crate::error::{NetworkFailureKind, ProbeError};
use crate::execution;
use crate::media::{Credentials, FormatTag, MediaDescriptor};
use crate::probe::{ProbeOutcome, ReachabilityProbe};
use crate::{Error, Result};
use result::ResultAggregator;

/// Probes every candidate of a [`MediaDescriptor`] concurrently and reports
/// which ones are reachable.
///
/// A run is started at most once. All candidates are probed even after one
/// is confirmed reachable, and the run completes only when every candidate
/// reported. Cancellation requested before the final outcome is recorded
/// wins: the run ends `Cancelled` and publishes no result.
///
/// Dropping the operation cancels a run still in flight.
pub struct VerificationOperation {
    inner: Arc<Inner>,
}

struct Inner {
    descriptor: Arc<MediaDescriptor>,
    credentials: Option<Credentials>,
    probe: Arc<dyn ReachabilityProbe>,
    config: VerifierConfig,
    state: watch::Sender<OperationState>,
    events: broadcast::Sender<CandidateEvent>,
    token: CancellationToken,
}

/// Builder for [`VerificationOperation`].
pub struct VerificationOperationBuilder {
    probe: Arc<dyn ReachabilityProbe>,
    descriptor: Option<Arc<MediaDescriptor>>,
    credentials: Option<Credentials>,
    config: VerifierConfig,
}

impl VerificationOperationBuilder {
    pub fn descriptor(mut self, descriptor: Arc<MediaDescriptor>) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Credentials handed to every probe. Falls back to the descriptor's own
    /// credentials when unset.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn credentials_opt(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<VerificationOperation> {
        let descriptor = self
            .descriptor
            .ok_or_else(|| Error::invalid_argument("a media descriptor is required"))?;
        if descriptor.candidates().is_empty() {
            return Err(Error::invalid_descriptor(format!(
                "descriptor `{}` has no candidates",
                descriptor.identifier()
            )));
        }

        let credentials = self
            .credentials
            .or_else(|| descriptor.credentials().cloned());
        let (state, _) = watch::channel(OperationState::Pending);
        let (events, _) = broadcast::channel(descriptor.candidates().len().max(16));

        Ok(VerificationOperation {
            inner: Arc::new(Inner {
                descriptor,
                credentials,
                probe: self.probe,
                config: self.config.normalized(),
                state,
                events,
                token: CancellationToken::new(),
            }),
        })
    }
}

impl VerificationOperation {
    pub fn builder(probe: Arc<dyn ReachabilityProbe>) -> VerificationOperationBuilder {
        VerificationOperationBuilder {
            probe,
            descriptor: None,
            credentials: None,
            config: VerifierConfig::default(),
        }
    }

    /// Shorthand for the builder. `descriptor` may be absent, which fails
    /// with [`Error::InvalidArgument`].
    pub fn new(
        descriptor: Option<Arc<MediaDescriptor>>,
        credentials: Option<Credentials>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self> {
        let mut builder = Self::builder(probe).credentials_opt(credentials);
        if let Some(descriptor) = descriptor {
            builder = builder.descriptor(descriptor);
        }
        builder.build()
    }

    pub fn descriptor(&self) -> &Arc<MediaDescriptor> {
        &self.inner.descriptor
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.inner.credentials.as_ref()
    }

    /// Begin the fan-out and return immediately.
    ///
    /// Must be called from a multi-threaded tokio runtime, otherwise
    /// [`Error::WrongExecutionContext`]. A second call returns
    /// [`Error::AlreadyStarted`] and does not re-run anything. Starting a
    /// cancelled operation is a no-op.
    pub fn start(&self) -> Result<()> {
        let handle = execution::require_multi_thread()?;

        let mut transition = Ok(false);
        self.inner.state.send_if_modified(|state| match state {
            OperationState::Pending => {
                *state = OperationState::Running;
                transition = Ok(true);
                true
            }
            OperationState::Cancelled => false,
            OperationState::Running | OperationState::Completed(_) => {
                transition = Err(Error::AlreadyStarted);
                false
            }
        });

        if !transition? {
            debug!(
                identifier = %self.inner.descriptor.identifier(),
                "Start ignored, verification was cancelled before it began"
            );
            return Ok(());
        }

        let span = info_span!(
            "verify",
            identifier = %self.inner.descriptor.identifier(),
            candidates = self.inner.descriptor.candidates().len()
        );
        handle.spawn(Arc::clone(&self.inner).run().instrument(span));
        Ok(())
    }

    /// Request cooperative cancellation. Idempotent, and harmless after completion.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn state(&self) -> OperationState {
        self.inner.state.borrow().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.inner.state.borrow(), OperationState::Cancelled)
    }

    /// The final result, once the run reached `Completed`.
    pub fn result(&self) -> Option<Arc<VerificationResult>> {
        match &*self.inner.state.borrow() {
            OperationState::Completed(result) => Some(Arc::clone(result)),
            _ => None,
        }
    }

    /// Wait for the terminal notification.
    ///
    /// Never resolves for an operation that is neither started nor cancelled.
    pub async fn wait(&self) -> Completion {
        let mut rx = self.inner.state.subscribe();
        let completion = match rx.wait_for(OperationState::is_terminal).await {
            Ok(state) => state.completion(),
            Err(_) => None,
        };
        completion.unwrap_or(Completion::Cancelled)
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<OperationState> {
        self.inner.state.subscribe()
    }

    /// Per-candidate outcomes as they are recorded. Outcomes recorded before
    /// subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<CandidateEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for VerificationOperation {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl Inner {
    fn cancel(&self) {
        let mut from = None;
        self.state.send_if_modified(|state| match state {
            OperationState::Pending | OperationState::Running => {
                from = Some(state.as_str());
                *state = OperationState::Cancelled;
                true
            }
            OperationState::Completed(_) | OperationState::Cancelled => false,
        });

        if let Some(from) = from {
            self.token.cancel();
            info!(
                identifier = %self.descriptor.identifier(),
                from,
                "Verification cancelled"
            );
        }
    }

    /// Publish the result unless cancellation got there first.
    fn complete(&self, result: VerificationResult) {
        let result = Arc::new(result);
        let published = self.state.send_if_modified(|state| {
            if matches!(state, OperationState::Running) {
                *state = OperationState::Completed(Arc::clone(&result));
                true
            } else {
                false
            }
        });

        if !published {
            debug!("Discarding verification result, run was cancelled");
            return;
        }

        if let Some(err) = result.overall_error() {
            warn!(
                failed = err.errors().len(),
                "No candidate stream is reachable"
            );
        } else {
            info!(
                verified = result.verified_streams().len(),
                failed = result.stream_errors().len(),
                "Verification completed"
            );
        }
    }

    async fn run(self: Arc<Self>) {
        let deadline = self.config.deadline_from(Instant::now());
        let limiter = self
            .config
            .max_concurrent_probes
            .map(|permits| Arc::new(Semaphore::new(permits)));
        let candidates = self.descriptor.candidates();

        let mut pending = FuturesUnordered::new();
        let mut abort_handles = Vec::with_capacity(candidates.len());
        for (tag, url) in candidates {
            let task = tokio::spawn(probe_candidate(
                Arc::clone(&self.probe),
                url.clone(),
                self.credentials.clone(),
                deadline,
                self.token.child_token(),
                limiter.clone(),
            ));
            abort_handles.push(task.abort_handle());
            let tag = *tag;
            pending.push(async move { (tag, task.await) });
        }

        let mut aggregator = ResultAggregator::new(candidates.len());
        while !aggregator.is_complete() {
            let (tag, joined) = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = pending.next() => match next {
                    Some(reported) => reported,
                    None => break,
                },
            };

            let outcome = outcome_from_join(tag, joined);
            if matches!(outcome, ProbeOutcome::Unreachable(ProbeError::Cancelled)) {
                // A probe aborted on its own; treat it as a cancelled run.
                self.cancel();
                break;
            }

            debug!(%tag, reachable = outcome.is_reachable(), error = ?outcome.error(), "Candidate probed");
            let _ = self.events.send(CandidateEvent {
                tag,
                outcome: outcome.clone(),
            });
            aggregator.record(tag, &candidates[&tag], outcome);
        }

        if self.token.is_cancelled() || !aggregator.is_complete() {
            for handle in abort_handles {
                handle.abort();
            }
            return;
        }

        self.complete(aggregator.finish());
    }
}

fn outcome_from_join(tag: FormatTag, joined: std::result::Result<ProbeOutcome, JoinError>) -> ProbeOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => ProbeError::Cancelled.into(),
        Err(e) => {
            warn!(%tag, error = %e, "Probe task panicked");
            ProbeError::network(NetworkFailureKind::Other, format!("probe task failed: {e}")).into()
        }
    }
}

async fn probe_candidate(
    probe: Arc<dyn ReachabilityProbe>,
    url: Url,
    credentials: Option<Credentials>,
    deadline: Instant,
    token: CancellationToken,
    limiter: Option<Arc<Semaphore>>,
) -> ProbeOutcome {
    let _permit = match limiter {
        Some(semaphore) => tokio::select! {
            biased;
            _ = token.cancelled() => return ProbeError::Cancelled.into(),
            permit = tokio::time::timeout_at(deadline, semaphore.acquire_owned()) => match permit {
                Ok(permit) => permit.ok(),
                Err(_) => return ProbeError::timeout("deadline elapsed waiting for a probe slot").into(),
            },
        },
        None => None,
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => ProbeError::Cancelled.into(),
        outcome = tokio::time::timeout_at(deadline, probe.probe(&url, credentials.as_ref(), deadline)) => {
            outcome.unwrap_or_else(|_| ProbeError::timeout("probe deadline elapsed").into())
        }
    }
}
