use reqwest::Proxy;

use crate::{Error, Result};

/// Proxy protocol used to reach candidate hosts.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Infer the proxy type from the URL scheme. Bare `host:port` is treated as HTTP.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let proxy_type = if url.starts_with("socks5://") || url.starts_with("socks5h://") {
            ProxyType::Socks5
        } else if url.starts_with("https://") {
            ProxyType::Https
        } else {
            ProxyType::Http
        };
        Self {
            url,
            proxy_type,
            auth: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub(crate) fn to_reqwest(&self) -> Result<Proxy> {
        let proxy_url = &self.url;

        let mut proxy = match self.proxy_type {
            // The type names the proxy's own protocol; every target scheme goes through it.
            ProxyType::Http => Proxy::all(proxy_url)
                .map_err(|e| Error::configuration(format!("invalid HTTP proxy URL: {e}")))?,
            ProxyType::Https => Proxy::all(proxy_url)
                .map_err(|e| Error::configuration(format!("invalid HTTPS proxy URL: {e}")))?,
            ProxyType::Socks5 => {
                let url = if proxy_url.starts_with("socks5://") || proxy_url.starts_with("socks5h://")
                {
                    proxy_url.to_string()
                } else {
                    format!("socks5://{proxy_url}")
                };
                Proxy::all(&url)
                    .map_err(|e| Error::configuration(format!("invalid SOCKS5 proxy URL: {e}")))?
            }
        };

        if let Some(auth) = &self.auth {
            proxy = proxy.basic_auth(&auth.username, &auth.password);
        }

        Ok(proxy)
    }
}
