use async_trait::async_trait;

use crate::error::FetchError;
use crate::media::{Credentials, MediaDescriptor};

/// Acquires the [`MediaDescriptor`] for a media identifier.
///
/// The wire protocol behind it is up to the implementation. Credentials are
/// passed through unchanged.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn fetch_descriptor(
        &self,
        identifier: &str,
        credentials: Option<&Credentials>,
    ) -> Result<MediaDescriptor, FetchError>;
}
