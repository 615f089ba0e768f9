use async_trait::async_trait;
use reqwest::{Client, redirect};
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use super::{ProbeOutcome, ReachabilityProbe};
use crate::config::ProbeConfig;
use crate::error::{NetworkFailureKind, ProbeError};
use crate::media::Credentials;
use crate::Result;

/// Probes candidates with a single `HEAD` request.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn build_client(config: &ProbeConfig) -> Result<Client> {
    let redirect_policy = if config.follow_redirects {
        redirect::Policy::limited(config.max_redirects)
    } else {
        redirect::Policy::none()
    };

    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .redirect(redirect_policy)
        .user_agent(config.user_agent.as_str())
        .default_headers(config.headers.clone())
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs);

    if let Some(proxy) = &config.proxy {
        debug!(url = %proxy.url, kind = ?proxy.proxy_type, "Using proxy for probes");
        builder = builder.proxy(proxy.to_reqwest()?);
    } else if !config.use_system_proxy {
        builder = builder.no_proxy();
    }

    Ok(builder.build()?)
}

fn classify(err: &reqwest::Error) -> ProbeError {
    let kind = if err.is_timeout() {
        NetworkFailureKind::Timeout
    } else if err.is_connect() {
        NetworkFailureKind::Connect
    } else if err.is_request() || err.is_redirect() || err.is_body() {
        NetworkFailureKind::Request
    } else {
        NetworkFailureKind::Other
    };
    ProbeError::network(kind, err.to_string())
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
        deadline: Instant,
    ) -> ProbeOutcome {
        let mut request = self.client.head(url.clone());
        if let Some(cookie) = credentials.and_then(Credentials::cookie_header) {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = match tokio::time::timeout_at(deadline, request.send()).await {
            Err(_) => {
                trace!(%url, "Probe deadline elapsed");
                return ProbeError::timeout("probe deadline elapsed").into();
            }
            Ok(Err(e)) => return classify(&e).into(),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        trace!(%url, %status, version = ?response.version(), "Probe response");
        if status.is_success() {
            ProbeOutcome::Reachable
        } else {
            ProbeError::http(status).into()
        }
    }
}
