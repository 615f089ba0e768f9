use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Identifies one quality/format variant of a media item.
///
/// Numeric codes follow the itag convention. [`FormatTag::Live`] is the
/// sentinel for the adaptive/live streaming manifest and sorts after every
/// numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatTag {
    Itag(u32),
    Live,
}

impl FormatTag {
    pub const SMALL_240: FormatTag = FormatTag::Itag(36);
    pub const MEDIUM_360: FormatTag = FormatTag::Itag(18);
    pub const HD_720: FormatTag = FormatTag::Itag(22);
    pub const HD_1080: FormatTag = FormatTag::Itag(37);

    pub fn is_live(&self) -> bool {
        matches!(self, FormatTag::Live)
    }

    pub fn itag(&self) -> Option<u32> {
        match self {
            FormatTag::Itag(code) => Some(*code),
            FormatTag::Live => None,
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatTag::Itag(code) => write!(f, "{code}"),
            FormatTag::Live => f.write_str("live"),
        }
    }
}

impl FromStr for FormatTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("live")
            || s.eq_ignore_ascii_case("hls")
            || s.eq_ignore_ascii_case("httplivestreaming")
        {
            return Ok(FormatTag::Live);
        }

        s.parse::<u32>()
            .map(FormatTag::Itag)
            .map_err(|_| Error::invalid_argument(format!("unknown format tag `{s}`")))
    }
}

impl TryFrom<String> for FormatTag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FormatTag> for String {
    fn from(tag: FormatTag) -> Self {
        tag.to_string()
    }
}

impl From<u32> for FormatTag {
    fn from(code: u32) -> Self {
        FormatTag::Itag(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_sentinel_tags() {
        assert_eq!("22".parse::<FormatTag>().unwrap(), FormatTag::HD_720);
        assert_eq!(" 18 ".parse::<FormatTag>().unwrap(), FormatTag::MEDIUM_360);
        assert_eq!("live".parse::<FormatTag>().unwrap(), FormatTag::Live);
        assert_eq!("HLS".parse::<FormatTag>().unwrap(), FormatTag::Live);
        assert_eq!(
            "HTTPLiveStreaming".parse::<FormatTag>().unwrap(),
            FormatTag::Live
        );
        assert!(matches!(
            "720p".parse::<FormatTag>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn live_sorts_after_numeric_codes() {
        let mut tags = vec![FormatTag::Live, FormatTag::HD_1080, FormatTag::MEDIUM_360];
        tags.sort();
        assert_eq!(
            tags,
            vec![FormatTag::MEDIUM_360, FormatTag::HD_1080, FormatTag::Live]
        );
    }

    #[test]
    fn serializes_as_json_object_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(FormatTag::HD_720, "a");
        map.insert(FormatTag::Live, "b");

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"22":"a","live":"b"}"#);

        let back: std::collections::BTreeMap<FormatTag, String> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&FormatTag::Live).map(String::as_str), Some("b"));
    }
}
