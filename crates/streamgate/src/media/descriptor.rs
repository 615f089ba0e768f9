use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use super::{Credentials, FormatTag};
use crate::{Error, Result};

/// Candidate variants and metadata for one media item.
///
/// Immutable after construction. Verification shares it by reference across
/// every concurrent probe and never mutates it.
///
/// ```rust
/// use streamgate::media::{FormatTag, MediaDescriptor};
///
/// let descriptor = MediaDescriptor::builder("dQw4w9WgXcQ")
///     .title("Sample")
///     .candidate(FormatTag::HD_720, "https://cdn.example.com/720.mp4")
///     .candidate(FormatTag::Live, "https://cdn.example.com/live.m3u8")
///     .build()
///     .unwrap();
///
/// assert_eq!(descriptor.candidates().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    identifier: String,
    title: Option<String>,
    duration: Option<Duration>,
    thumbnails: Thumbnails,
    candidates: BTreeMap<FormatTag, Url>,
    expires_at: Option<DateTime<Utc>>,
    credentials: Option<Credentials>,
}

/// Optional preview images, smallest to largest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnails {
    pub small: Option<Url>,
    pub medium: Option<Url>,
    pub large: Option<Url>,
}

impl MediaDescriptor {
    pub fn builder(identifier: impl Into<String>) -> MediaDescriptorBuilder {
        MediaDescriptorBuilder::new(identifier)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn thumbnails(&self) -> &Thumbnails {
        &self.thumbnails
    }

    pub fn candidates(&self) -> &BTreeMap<FormatTag, Url> {
        &self.candidates
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether the candidate URLs are presumed stale at `now`.
    ///
    /// Informational only; verification does not consult it.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }

    /// Parse and validate a descriptor document.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: DescriptorDocument = serde_json::from_str(json)
            .map_err(|e| Error::invalid_descriptor(format!("malformed document: {e}")))?;
        document.try_into()
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&DescriptorDocument::from(self))
    }
}

#[derive(Debug, Clone)]
pub struct MediaDescriptorBuilder {
    identifier: String,
    title: Option<String>,
    duration: Option<Duration>,
    thumbnails: Thumbnails,
    candidates: Vec<(FormatTag, String)>,
    expires_at: Option<DateTime<Utc>>,
    credentials: Option<Credentials>,
}

impl MediaDescriptorBuilder {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: None,
            duration: None,
            thumbnails: Thumbnails::default(),
            candidates: Vec::new(),
            expires_at: None,
            credentials: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn thumbnails(mut self, thumbnails: Thumbnails) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    /// Add a candidate. A later candidate with the same tag replaces the earlier one.
    pub fn candidate(mut self, tag: FormatTag, url: impl Into<String>) -> Self {
        self.candidates.push((tag, url.into()));
        self
    }

    pub fn candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = (FormatTag, S)>,
        S: Into<String>,
    {
        self.candidates
            .extend(candidates.into_iter().map(|(tag, url)| (tag, url.into())));
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn expires_at_opt(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn credentials_opt(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn build(self) -> Result<MediaDescriptor> {
        let identifier = self.identifier.trim();
        if identifier.is_empty() {
            return Err(Error::invalid_descriptor("missing media identifier"));
        }

        let mut candidates = BTreeMap::new();
        for (tag, raw) in self.candidates {
            candidates.insert(tag, parse_stream_url(tag, &raw)?);
        }

        Ok(MediaDescriptor {
            identifier: identifier.to_string(),
            title: self.title,
            duration: self.duration,
            thumbnails: self.thumbnails,
            candidates,
            expires_at: self.expires_at,
            credentials: self.credentials,
        })
    }
}

fn parse_stream_url(tag: FormatTag, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::invalid_descriptor(format!("candidate {tag}: invalid url `{raw}`: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::invalid_descriptor(format!(
            "candidate {tag}: unsupported scheme `{other}`"
        ))),
    }
}

/// Wire form of a descriptor, validated through the builder on the way in.
#[derive(Debug, Serialize, Deserialize)]
struct DescriptorDocument {
    #[serde(alias = "id")]
    identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(alias = "streams")]
    candidates: BTreeMap<FormatTag, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cookies: Option<String>,
}

impl TryFrom<DescriptorDocument> for MediaDescriptor {
    type Error = Error;

    fn try_from(doc: DescriptorDocument) -> Result<Self> {
        let mut builder = MediaDescriptor::builder(doc.identifier)
            .thumbnails(doc.thumbnails)
            .candidates(doc.candidates)
            .expires_at_opt(doc.expires_at)
            .credentials_opt(doc.cookies.as_deref().map(Credentials::from_cookie_header));

        if let Some(title) = doc.title {
            builder = builder.title(title);
        }
        if let Some(secs) = doc.duration_secs {
            let duration = Duration::try_from_secs_f64(secs)
                .map_err(|e| Error::invalid_descriptor(format!("invalid duration: {e}")))?;
            builder = builder.duration(duration);
        }

        builder.build()
    }
}

impl From<&MediaDescriptor> for DescriptorDocument {
    fn from(descriptor: &MediaDescriptor) -> Self {
        Self {
            identifier: descriptor.identifier.clone(),
            title: descriptor.title.clone(),
            duration_secs: descriptor.duration.map(|d| d.as_secs_f64()),
            thumbnails: descriptor.thumbnails.clone(),
            candidates: descriptor
                .candidates
                .iter()
                .map(|(tag, url)| (*tag, url.to_string()))
                .collect(),
            expires_at: descriptor.expires_at,
            cookies: descriptor
                .credentials
                .as_ref()
                .and_then(Credentials::cookie_header),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_identifier_is_rejected() {
        let err = MediaDescriptor::builder("   ")
            .candidate(FormatTag::HD_720, "https://a.example/720")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor(_)));
    }

    #[test]
    fn non_http_candidate_is_rejected() {
        let err = MediaDescriptor::builder("abc")
            .candidate(FormatTag::HD_720, "file:///etc/passwd")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn duplicate_tags_keep_last_url() {
        let descriptor = MediaDescriptor::builder("abc")
            .candidate(FormatTag::HD_720, "https://a.example/old")
            .candidate(FormatTag::HD_720, "https://a.example/new")
            .build()
            .unwrap();
        assert_eq!(descriptor.candidates().len(), 1);
        assert_eq!(
            descriptor.candidates()[&FormatTag::HD_720].as_str(),
            "https://a.example/new"
        );
    }

    #[test]
    fn expiry_is_informational() {
        let expiry = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let descriptor = MediaDescriptor::builder("abc")
            .candidate(FormatTag::Live, "https://a.example/live.m3u8")
            .expires_at(expiry)
            .build()
            .unwrap();

        assert!(descriptor.is_expired(expiry));
        assert!(!descriptor.is_expired(expiry - chrono::Duration::seconds(1)));
    }

    #[test]
    fn parses_json_document() {
        let json = r#"{
            "id": "abc",
            "title": "Sample",
            "duration_secs": 212.5,
            "streams": {
                "18": "https://a.example/360.mp4",
                "live": "https://a.example/live.m3u8"
            },
            "cookies": "SID=1"
        }"#;

        let descriptor = MediaDescriptor::from_json(json).unwrap();
        assert_eq!(descriptor.identifier(), "abc");
        assert_eq!(descriptor.title(), Some("Sample"));
        assert_eq!(descriptor.duration(), Some(Duration::from_millis(212_500)));
        assert!(descriptor.candidates().contains_key(&FormatTag::MEDIUM_360));
        assert!(descriptor.candidates().contains_key(&FormatTag::Live));
        assert_eq!(
            descriptor.credentials().and_then(Credentials::cookie_header).as_deref(),
            Some("SID=1")
        );

        let again = MediaDescriptor::from_json(&descriptor.to_json_pretty().unwrap()).unwrap();
        assert_eq!(again, descriptor);
    }

    #[test]
    fn json_document_with_bad_tag_is_invalid() {
        let json = r#"{"id": "abc", "candidates": {"720p": "https://a.example/x"}}"#;
        assert!(matches!(
            MediaDescriptor::from_json(json),
            Err(Error::InvalidDescriptor(_))
        ));
    }
}
