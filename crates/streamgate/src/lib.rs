//! # Streamgate
//!
//! Verifies which stream candidates of a media item are actually playable
//! before they are handed to a player.
//!
//! ## Features
//!
//! - `MediaDescriptor`: validated mapping of format tags to candidate URLs
//! - `ReachabilityProbe` with an HTTP `HEAD` implementation on reqwest
//! - `VerificationOperation`: concurrent, cancellable fan-out over every candidate
//! - `StreamResolver`: fetch, verify and de-duplicate concurrent requests
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamgate::{
//!     FormatTag, HttpProbe, MediaDescriptor, ProbeConfig, VerificationOperation,
//! };
//!
//! # async fn run() -> streamgate::Result<()> {
//! let descriptor = MediaDescriptor::builder("dQw4w9WgXcQ")
//!     .candidate(FormatTag::HD_720, "https://cdn.example.com/720.mp4")
//!     .candidate(FormatTag::MEDIUM_360, "https://cdn.example.com/360.mp4")
//!     .build()?;
//!
//! let probe = Arc::new(HttpProbe::new(&ProbeConfig::default())?);
//! let operation = VerificationOperation::builder(probe)
//!     .descriptor(Arc::new(descriptor))
//!     .build()?;
//! operation.start()?;
//!
//! if let Some(result) = operation.wait().await.result() {
//!     for (tag, url) in result.verified_streams() {
//!         println!("{tag}: {url}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod media;
pub mod operation;
pub mod probe;
pub mod proxy;
pub mod resolver;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ProbeConfig, VerifierConfig};
pub use error::{Error, FetchError, NetworkFailureKind, NoStreamAvailable, ProbeError, Result};
pub use media::{Cookie, Credentials, FormatTag, MediaDescriptor, MediaDescriptorBuilder, Thumbnails};
pub use operation::{
    CandidateEvent, Completion, OperationState, VerificationOperation,
    VerificationOperationBuilder, VerificationResult,
};
pub use probe::{HttpProbe, ProbeOutcome, ReachabilityProbe};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use resolver::{
    CancelHandle, DescriptorSource, Resolution, ResolveHandle, ResolvedStreams, StreamResolver,
};

/// Re-export so callers can match on HTTP status codes without a direct dependency.
pub use reqwest::StatusCode;
