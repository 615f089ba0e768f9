//! Caller-facing resolution: fetch a descriptor, verify it, hand back the
//! usable streams.
//!
//! Concurrent requests for the same identifier share one piece of work.
//! The second caller attaches to the in-flight resolution instead of
//! fetching and probing again.

mod in_flight;
mod source;

pub use in_flight::CancelHandle;
pub use source::DescriptorSource;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use crate::config::VerifierConfig;
use crate::execution;
use crate::media::{Credentials, FormatTag, MediaDescriptor};
use crate::operation::{Completion, VerificationOperation, VerificationResult};
use crate::probe::ReachabilityProbe;
use crate::{Error, Result};
use in_flight::{InFlightState, Registry};

/// Streams confirmed reachable for one media item.
#[derive(Debug, Clone)]
pub struct ResolvedStreams {
    descriptor: Arc<MediaDescriptor>,
    result: Arc<VerificationResult>,
}

impl ResolvedStreams {
    pub fn descriptor(&self) -> &Arc<MediaDescriptor> {
        &self.descriptor
    }

    /// Never empty.
    pub fn streams(&self) -> &BTreeMap<FormatTag, Url> {
        self.result.verified_streams()
    }

    pub fn result(&self) -> &Arc<VerificationResult> {
        &self.result
    }

    /// First verified stream in order of preference.
    pub fn preferred<'a>(
        &self,
        preference: impl IntoIterator<Item = &'a FormatTag>,
    ) -> Option<(FormatTag, &Url)> {
        preference
            .into_iter()
            .find_map(|tag| self.streams().get(tag).map(|url| (*tag, url)))
    }
}

/// Terminal outcome of [`StreamResolver::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(ResolvedStreams),
    /// Either [`Error::NoStreamAvailable`] or a descriptor acquisition error.
    Failed(Arc<Error>),
    Cancelled,
}

impl Resolution {
    pub fn streams(&self) -> Option<&BTreeMap<FormatTag, Url>> {
        match self {
            Resolution::Resolved(resolved) => Some(resolved.streams()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<Error>> {
        match self {
            Resolution::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Resolution::Cancelled)
    }

    /// `None` when cancelled.
    pub fn into_result(self) -> Option<std::result::Result<ResolvedStreams, Arc<Error>>> {
        match self {
            Resolution::Resolved(resolved) => Some(Ok(resolved)),
            Resolution::Failed(err) => Some(Err(err)),
            Resolution::Cancelled => None,
        }
    }
}

/// Handle to one caller's pending resolution.
#[derive(Debug)]
pub struct ResolveHandle {
    canceller: CancelHandle,
}

impl ResolveHandle {
    pub fn identifier(&self) -> &str {
        self.canceller.identifier()
    }

    pub fn canceller(&self) -> CancelHandle {
        self.canceller.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the outcome. Returns `Cancelled` as soon as this caller
    /// cancelled, even if other callers keep the shared work alive.
    pub async fn wait(self) -> Resolution {
        tokio::select! {
            biased;
            _ = self.canceller.token().cancelled() => Resolution::Cancelled,
            resolution = self.canceller.state().wait() => resolution,
        }
    }
}

/// Resolves media identifiers to verified streams.
///
/// Constructed once and shared by the application; [`shutdown`](Self::shutdown)
/// cancels everything still in flight.
pub struct StreamResolver {
    source: Arc<dyn DescriptorSource>,
    probe: Arc<dyn ReachabilityProbe>,
    config: VerifierConfig,
    in_flight: Arc<Registry>,
}

impl StreamResolver {
    pub fn new(
        source: Arc<dyn DescriptorSource>,
        probe: Arc<dyn ReachabilityProbe>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            source,
            probe,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Start resolving `identifier`, or attach to a resolution already in
    /// flight for it. An attaching caller shares the first caller's
    /// credentials.
    pub fn resolve(
        &self,
        identifier: &str,
        credentials: Option<Credentials>,
    ) -> Result<ResolveHandle> {
        let handle = execution::require_multi_thread()?;
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::invalid_argument("media identifier must not be empty"));
        }

        let (state, is_new) = in_flight::get_or_create(&self.in_flight, identifier);
        if is_new {
            let span = info_span!("resolve", identifier = %identifier);
            handle.spawn(
                drive(
                    Arc::clone(&self.source),
                    Arc::clone(&self.probe),
                    self.config.clone(),
                    identifier.to_string(),
                    credentials,
                    Arc::clone(&state),
                    Arc::clone(&self.in_flight),
                )
                .instrument(span),
            );
        } else {
            debug!(
                identifier,
                attached = state.attached(),
                "Attached to in-flight resolution"
            );
        }

        Ok(ResolveHandle {
            canceller: CancelHandle::new(identifier, state, Arc::clone(&self.in_flight)),
        })
    }

    /// Resolve and deliver the outcome to `callback` exactly once, on a
    /// runtime worker. The returned handle cancels this caller.
    pub fn resolve_with<F>(
        &self,
        identifier: &str,
        credentials: Option<Credentials>,
        callback: F,
    ) -> Result<CancelHandle>
    where
        F: FnOnce(Resolution) + Send + 'static,
    {
        let pending = self.resolve(identifier, credentials)?;
        let canceller = pending.canceller();
        tokio::spawn(async move {
            callback(pending.wait().await);
        });
        Ok(canceller)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, identifier: &str) -> bool {
        self.in_flight.contains_key(identifier.trim())
    }

    /// Cancel every in-flight resolution. Attached callers observe `Cancelled`.
    pub fn shutdown(&self) {
        let mut cancelled = 0usize;
        self.in_flight.retain(|_, state| {
            state.token().cancel();
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            info!(cancelled, "Stream resolver shut down");
        }
    }
}

impl Drop for StreamResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drive(
    source: Arc<dyn DescriptorSource>,
    probe: Arc<dyn ReachabilityProbe>,
    config: VerifierConfig,
    identifier: String,
    credentials: Option<Credentials>,
    state: Arc<InFlightState>,
    registry: Arc<Registry>,
) {
    let resolution = tokio::select! {
        biased;
        _ = state.token().cancelled() => Resolution::Cancelled,
        resolution = resolve_once(source, probe, config, &identifier, credentials) => resolution,
    };

    match &resolution {
        Resolution::Resolved(resolved) => info!(
            streams = resolved.streams().len(),
            "Resolved playable streams"
        ),
        Resolution::Failed(err) => warn!(error = %err, "Resolution failed"),
        Resolution::Cancelled => debug!("Resolution cancelled"),
    }

    in_flight::remove(&registry, &identifier, &state);
    state.set_result(resolution);
}

async fn resolve_once(
    source: Arc<dyn DescriptorSource>,
    probe: Arc<dyn ReachabilityProbe>,
    config: VerifierConfig,
    identifier: &str,
    credentials: Option<Credentials>,
) -> Resolution {
    let descriptor = match source.fetch_descriptor(identifier, credentials.as_ref()).await {
        Ok(descriptor) => Arc::new(descriptor),
        Err(e) => return Resolution::Failed(Arc::new(e.into())),
    };
    if descriptor.is_expired(Utc::now()) {
        warn!(expires_at = ?descriptor.expires_at(), "Descriptor already expired, verifying anyway");
    }

    let operation = match VerificationOperation::builder(probe)
        .descriptor(Arc::clone(&descriptor))
        .credentials_opt(credentials)
        .config(config)
        .build()
    {
        Ok(operation) => operation,
        Err(e) => return Resolution::Failed(Arc::new(e)),
    };
    if let Err(e) = operation.start() {
        return Resolution::Failed(Arc::new(e));
    }

    // Dropping `operation` when this future is abandoned cancels the run.
    match operation.wait().await {
        Completion::Cancelled => Resolution::Cancelled,
        Completion::Completed(result) => match result.overall_error() {
            Some(err) => Resolution::Failed(Arc::new(err.clone().into())),
            None => Resolution::Resolved(ResolvedStreams { descriptor, result }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ProbeError};
    use crate::probe::ProbeOutcome;
    use crate::test_utils::{GatedProbe, ScriptedProbe, StaticSource, descriptor, init_tracing};
    use reqwest::StatusCode;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn resolver(source: Arc<StaticSource>, probe: Arc<dyn ReachabilityProbe>) -> StreamResolver {
        StreamResolver::new(source, probe, VerifierConfig::default())
    }

    fn owned(descriptor: Arc<MediaDescriptor>) -> MediaDescriptor {
        (*descriptor).clone()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resolves_verified_streams() {
        init_tracing();
        let source = Arc::new(StaticSource::new().with(owned(descriptor(
            "abc",
            &[(22, "https://a.example/22"), (18, "https://a.example/18")],
        ))));
        let probe = Arc::new(
            ScriptedProbe::new()
                .reachable("https://a.example/22")
                .failing("https://a.example/18", ProbeError::http(StatusCode::NOT_FOUND)),
        );
        let resolver = resolver(source, probe);

        let resolution = resolver.resolve("abc", None).unwrap().wait().await;
        let streams = resolution.streams().expect("resolved");
        assert_eq!(streams.keys().copied().collect::<Vec<_>>(), vec![FormatTag::HD_720]);

        let Resolution::Resolved(resolved) = resolution else {
            unreachable!()
        };
        assert_eq!(
            resolved.preferred(&[FormatTag::HD_1080, FormatTag::HD_720, FormatTag::MEDIUM_360]),
            Some((FormatTag::HD_720, &Url::parse("https://a.example/22").unwrap()))
        );
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn total_failure_is_no_stream_available() {
        let source = Arc::new(
            StaticSource::new().with(owned(descriptor("abc", &[(1, "https://a.example/1")]))),
        );
        let probe = Arc::new(
            ScriptedProbe::new().failing("https://a.example/1", ProbeError::http(StatusCode::GONE)),
        );
        let resolver = resolver(source, probe);

        let resolution = resolver.resolve("abc", None).unwrap().wait().await;
        let err = resolution.error().expect("failed");
        match err.as_ref() {
            Error::NoStreamAvailable(detail) => assert_eq!(
                detail.error_for(FormatTag::Itag(1)),
                Some(&ProbeError::http(StatusCode::GONE))
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetch_failure_is_reported() {
        let source = Arc::new(StaticSource::new());
        let probe = Arc::new(ScriptedProbe::new());
        let resolver = resolver(source, probe.clone());

        let resolution = resolver.resolve("missing", None).unwrap().wait().await;
        assert!(matches!(
            resolution.error().map(|err| &**err),
            Some(Error::Fetch(FetchError::NotFound { .. }))
        ));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_identifier_is_invalid_argument() {
        let resolver = resolver(Arc::new(StaticSource::new()), Arc::new(ScriptedProbe::new()));
        assert!(matches!(
            resolver.resolve("  ", None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn resolve_requires_multi_thread_runtime() {
        let resolver = resolver(Arc::new(StaticSource::new()), Arc::new(ScriptedProbe::new()));
        assert!(matches!(
            resolver.resolve("abc", None),
            Err(Error::WrongExecutionContext(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_share_one_resolution() {
        init_tracing();
        let source = Arc::new(
            StaticSource::new().with(owned(descriptor("abc", &[(1, "https://a.example/1")]))),
        );
        let probe = Arc::new(GatedProbe::new());
        let gate = probe.gate("https://a.example/1");
        let resolver = resolver(source.clone(), probe.clone());

        let first = resolver.resolve("abc", None).unwrap();
        let second = resolver.resolve("abc", None).unwrap();
        assert_eq!(resolver.in_flight_count(), 1);

        probe.wait_started(1).await;
        gate.send(ProbeOutcome::Reachable).unwrap();

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert!(a.streams().is_some());
        assert!(b.streams().is_some());
        assert_eq!(source.fetches(), 1);
        assert_eq!(probe.started(), 1);
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_caller_cancelling_keeps_shared_work_alive() {
        let source = Arc::new(
            StaticSource::new().with(owned(descriptor("abc", &[(1, "https://a.example/1")]))),
        );
        let probe = Arc::new(GatedProbe::new());
        let gate = probe.gate("https://a.example/1");
        let resolver = resolver(source, probe.clone());

        let first = resolver.resolve("abc", None).unwrap();
        let second = resolver.resolve("abc", None).unwrap();
        probe.wait_started(1).await;

        first.cancel();
        assert!(first.wait().await.is_cancelled());
        assert!(resolver.is_in_flight("abc"));

        gate.send(ProbeOutcome::Reachable).unwrap();
        assert!(second.wait().await.streams().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn last_caller_cancelling_cancels_the_work() {
        init_tracing();
        let source = Arc::new(
            StaticSource::new().with(owned(descriptor("abc", &[(1, "https://a.example/1")]))),
        );
        let probe = Arc::new(GatedProbe::new());
        let _gate = probe.gate("https://a.example/1");
        let resolver = resolver(source, probe.clone());

        let first = resolver.resolve("abc", None).unwrap();
        let second = resolver.resolve("abc", None).unwrap();
        probe.wait_started(1).await;

        first.cancel();
        second.cancel();
        second.cancel();
        assert!(second.wait().await.is_cancelled());
        assert!(!resolver.is_in_flight("abc"));

        // A fresh request after cancellation starts new work.
        let third = resolver.resolve("abc", None).unwrap();
        assert!(resolver.is_in_flight("abc"));
        third.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn callback_receives_outcome_once() {
        let source = Arc::new(
            StaticSource::new().with(owned(descriptor("abc", &[(1, "https://a.example/1")]))),
        );
        let probe = Arc::new(ScriptedProbe::new().reachable("https://a.example/1"));
        let resolver = resolver(source, probe);

        let (tx, rx) = oneshot::channel();
        let canceller = resolver
            .resolve_with("abc", None, move |resolution| {
                let _ = tx.send(resolution);
            })
            .unwrap();

        let resolution = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(resolution.streams().is_some());
        canceller.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn credentials_are_passed_through() {
        let source = Arc::new(
            StaticSource::new().with(owned(descriptor("abc", &[(1, "https://a.example/1")]))),
        );
        let probe = Arc::new(ScriptedProbe::new().reachable("https://a.example/1"));
        let resolver = resolver(source.clone(), probe.clone());

        let credentials = Credentials::from_cookie_header("SID=secret");
        resolver
            .resolve("abc", Some(credentials))
            .unwrap()
            .wait()
            .await;

        assert_eq!(source.seen_cookies(), vec![Some("SID=secret".to_string())]);
        assert_eq!(probe.seen_cookies(), vec![Some("SID=secret".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_cancels_in_flight_work() {
        init_tracing();
        let source = Arc::new(
            StaticSource::new().with(owned(descriptor("abc", &[(1, "https://a.example/1")]))),
        );
        let probe = Arc::new(GatedProbe::new());
        let _gate = probe.gate("https://a.example/1");
        let resolver = resolver(source, probe.clone());

        let pending = resolver.resolve("abc", None).unwrap();
        probe.wait_started(1).await;

        resolver.shutdown();
        assert_eq!(resolver.in_flight_count(), 0);
        assert!(pending.wait().await.is_cancelled());
    }
}
