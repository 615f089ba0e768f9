use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use tokio::time::Instant;

use crate::proxy::ProxyConfig;

/// Longest deadline budget a verification run accepts. Larger values are clamped.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// HTTP client options for the reachability probe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Connection timeout (time to establish the initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects before judging the response
    pub follow_redirects: bool,

    /// Maximum redirect hops when `follow_redirects` is set
    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,

    /// Extra headers sent with every probe
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: ProbeConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
        }
    }
}

impl ProbeConfig {
    /// Merge caller headers over the defaults; caller values win.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}

/// Settings for one verification run.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Deadline budget shared by every probe of a run, measured from `start()`.
    pub probe_timeout: Duration,

    /// Upper bound on probes in flight at once. `None` probes every candidate at once.
    pub max_concurrent_probes: Option<usize>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            max_concurrent_probes: None,
        }
    }
}

impl VerifierConfig {
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_max_concurrent_probes(mut self, limit: usize) -> Self {
        self.max_concurrent_probes = Some(limit.max(1));
        self
    }

    /// Deadline of a run starting at `now`. Never overflows.
    pub(crate) fn deadline_from(&self, now: Instant) -> Instant {
        let budget = self.probe_timeout.min(MAX_PROBE_TIMEOUT);
        now.checked_add(budget).unwrap_or(now)
    }

    /// Copy with values a run cannot honour brought back into range.
    pub(crate) fn normalized(mut self) -> Self {
        self.probe_timeout = self.probe_timeout.min(MAX_PROBE_TIMEOUT);
        self.max_concurrent_probes = self.max_concurrent_probes.map(|limit| limit.max(1));
        self
    }
}
