use std::collections::BTreeMap;
use std::fmt;

use reqwest::StatusCode;

use crate::media::FormatTag;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("verification already started")]
    AlreadyStarted,

    #[error("wrong execution context: {0}")]
    WrongExecutionContext(String),

    #[error(transparent)]
    NoStreamAvailable(#[from] NoStreamAvailable),

    #[error("descriptor acquisition failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl Error {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor(reason.into())
    }

    pub fn wrong_execution_context(reason: impl Into<String>) -> Self {
        Self::WrongExecutionContext(reason.into())
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Usage and construction errors are caller contract violations.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::InvalidDescriptor(_)
                | Self::AlreadyStarted
                | Self::WrongExecutionContext(_)
        )
    }
}

/// Sub-classification of a network level probe failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFailureKind {
    /// The deadline elapsed before a response arrived.
    Timeout,
    /// Connection could not be established (refused, DNS, TLS handshake).
    Connect,
    /// The request failed after the connection was made.
    Request,
    Other,
}

impl NetworkFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkFailureKind::Timeout => "timeout",
            NetworkFailureKind::Connect => "connect",
            NetworkFailureKind::Request => "request",
            NetworkFailureKind::Other => "other",
        }
    }
}

impl fmt::Display for NetworkFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single candidate was not verified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("network failure ({kind}): {message}")]
    Network {
        kind: NetworkFailureKind,
        message: String,
    },

    #[error("HTTP {status}")]
    Http { status: StatusCode },

    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn network(kind: NetworkFailureKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::network(NetworkFailureKind::Timeout, message)
    }

    pub fn http(status: StatusCode) -> Self {
        Self::Http { status }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Network {
                kind: NetworkFailureKind::Timeout,
                ..
            }
        )
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status } => Some(*status),
            _ => None,
        }
    }
}

/// Every candidate of a descriptor failed verification.
///
/// Carries the per-tag reasons so callers can tell which quality failed and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no stream available: all {} candidate(s) failed", .errors.len())]
pub struct NoStreamAvailable {
    errors: BTreeMap<FormatTag, ProbeError>,
}

impl NoStreamAvailable {
    pub fn new(errors: BTreeMap<FormatTag, ProbeError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &BTreeMap<FormatTag, ProbeError> {
        &self.errors
    }

    pub fn error_for(&self, tag: FormatTag) -> Option<&ProbeError> {
        self.errors.get(&tag)
    }
}

/// Failure reported by a [`DescriptorSource`](crate::resolver::DescriptorSource).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("media `{identifier}` not found")]
    NotFound { identifier: String },

    #[error("media unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed descriptor: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}
