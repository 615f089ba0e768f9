use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use streamgate::{Credentials, DescriptorSource, FetchError, MediaDescriptor};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{AppError, Result};

/// Descriptors read from a JSON document: one object, or an array of them.
///
/// Entries are only indexed by identifier here; each is validated when it
/// is fetched so one malformed entry does not hide the others.
#[derive(Debug, Default)]
pub struct DocumentSource {
    entries: BTreeMap<String, Value>,
}

impl DocumentSource {
    /// Read from `path`, or stdin when absent or `-`.
    pub async fn read(path: Option<&Path>) -> Result<Self> {
        let text = match path {
            Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path).await?,
            _ => {
                let mut buffer = String::new();
                tokio::io::stdin().read_to_string(&mut buffer).await?;
                buffer
            }
        };
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text)?;
        let items = match document {
            Value::Array(items) => items,
            item @ Value::Object(_) => vec![item],
            _ => {
                return Err(AppError::InvalidInput(
                    "expected a descriptor object or an array of descriptors".into(),
                ));
            }
        };

        let mut entries = BTreeMap::new();
        for (index, item) in items.into_iter().enumerate() {
            let identifier = item
                .get("identifier")
                .or_else(|| item.get("id"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    AppError::InvalidInput(format!("descriptor #{index} has no identifier"))
                })?
                .to_string();
            if entries.insert(identifier.clone(), item).is_some() {
                return Err(AppError::InvalidInput(format!(
                    "duplicate descriptor identifier `{identifier}`"
                )));
            }
        }
        debug!(count = entries.len(), "Loaded descriptor document");
        Ok(Self { entries })
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DescriptorSource for DocumentSource {
    async fn fetch_descriptor(
        &self,
        identifier: &str,
        _credentials: Option<&Credentials>,
    ) -> std::result::Result<MediaDescriptor, FetchError> {
        let entry = self
            .entries
            .get(identifier)
            .ok_or_else(|| FetchError::not_found(identifier))?;
        MediaDescriptor::from_json(&entry.to_string()).map_err(|e| FetchError::Parse(e.to_string()))
    }
}
