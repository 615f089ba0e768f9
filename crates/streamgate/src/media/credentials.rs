use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Authentication context needed to reach candidate URLs.
///
/// Immutable once built and cheap to clone; verification only passes it
/// through to the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    cookies: Arc<[Cookie]>,
}

impl Credentials {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self {
            cookies: cookies.into(),
        }
    }

    /// Parse a browser style cookie string, e.g. `"SID=abc; HSID=xyz"`.
    ///
    /// Pairs without a `=` are skipped.
    pub fn from_cookie_header(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(Cookie::new(name, value.trim()))
            })
            .collect::<Vec<_>>();
        Self::new(cookies)
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Render the cookies as a `Cookie` request header value.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let header = self
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }
}
