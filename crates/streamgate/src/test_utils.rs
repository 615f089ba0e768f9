use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use url::Url;

use crate::error::{FetchError, NetworkFailureKind, ProbeError};
use crate::media::{Credentials, FormatTag, MediaDescriptor};
use crate::probe::{ProbeOutcome, ReachabilityProbe};
use crate::resolver::DescriptorSource;

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Build a descriptor from `(itag, url)` pairs.
pub fn descriptor(identifier: &str, candidates: &[(u32, &str)]) -> Arc<MediaDescriptor> {
    let descriptor = MediaDescriptor::builder(identifier)
        .candidates(
            candidates
                .iter()
                .map(|(itag, url)| (FormatTag::Itag(*itag), *url)),
        )
        .build()
        .expect("valid test descriptor");
    Arc::new(descriptor)
}

enum Script {
    Respond {
        delay: Duration,
        outcome: ProbeOutcome,
    },
    Panic,
}

/// Probe answering from a fixed script keyed by URL.
///
/// Unscripted URLs fail with a network error.
#[derive(Default)]
pub struct ScriptedProbe {
    script: HashMap<String, Script>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen_cookies: Mutex<Vec<Option<String>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reachable(self, url: &str) -> Self {
        self.reachable_after(url, Duration::ZERO)
    }

    pub fn reachable_after(self, url: &str, delay: Duration) -> Self {
        self.respond(url, delay, ProbeOutcome::Reachable)
    }

    pub fn failing(self, url: &str, error: ProbeError) -> Self {
        self.respond(url, Duration::ZERO, error.into())
    }

    pub fn panicking(mut self, url: &str) -> Self {
        self.script.insert(url.to_string(), Script::Panic);
        self
    }

    fn respond(mut self, url: &str, delay: Duration, outcome: ProbeOutcome) -> Self {
        self.script
            .insert(url.to_string(), Script::Respond { delay, outcome });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn seen_cookies(&self) -> Vec<Option<String>> {
        self.seen_cookies.lock().clone()
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
        _deadline: Instant,
    ) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_cookies
            .lock()
            .push(credentials.and_then(Credentials::cookie_header));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let outcome = match self.script.get(url.as_str()) {
            Some(Script::Respond { delay, outcome }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                outcome.clone()
            }
            Some(Script::Panic) => panic!("scripted probe panic for {url}"),
            None => ProbeError::network(NetworkFailureKind::Other, "unscripted url").into(),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Probe whose outcomes are released by the test, one gate per URL.
///
/// A URL without a gate never answers.
#[derive(Default)]
pub struct GatedProbe {
    gates: Mutex<HashMap<String, oneshot::Receiver<ProbeOutcome>>>,
    started: AtomicUsize,
    notify: Notify,
}

impl GatedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, url: &str) -> oneshot::Sender<ProbeOutcome> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(url.to_string(), rx);
        tx
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` probes are in progress.
    pub async fn wait_started(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.started() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("probes did not start in time");
    }
}

#[async_trait]
impl ReachabilityProbe for GatedProbe {
    async fn probe(
        &self,
        url: &Url,
        _credentials: Option<&Credentials>,
        _deadline: Instant,
    ) -> ProbeOutcome {
        let gate = self.gates.lock().remove(url.as_str());
        self.started.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();

        match gate {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                ProbeError::network(NetworkFailureKind::Other, "gate dropped").into()
            }),
            None => std::future::pending().await,
        }
    }
}

/// In-memory descriptor source.
#[derive(Default)]
pub struct StaticSource {
    descriptors: HashMap<String, MediaDescriptor>,
    fetches: AtomicUsize,
    seen_cookies: Mutex<Vec<Option<String>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, descriptor: MediaDescriptor) -> Self {
        self.descriptors
            .insert(descriptor.identifier().to_string(), descriptor);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn seen_cookies(&self) -> Vec<Option<String>> {
        self.seen_cookies.lock().clone()
    }
}

#[async_trait]
impl DescriptorSource for StaticSource {
    async fn fetch_descriptor(
        &self,
        identifier: &str,
        credentials: Option<&Credentials>,
    ) -> Result<MediaDescriptor, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.seen_cookies
            .lock()
            .push(credentials.and_then(Credentials::cookie_header));
        self.descriptors
            .get(identifier)
            .cloned()
            .ok_or_else(|| FetchError::not_found(identifier))
    }
}
