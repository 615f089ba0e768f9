use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use streamgate::{Error, FormatTag, Resolution};

use crate::cli::OutputFormat;
use crate::error::Result;

/// Outcome of one media item as printed by the CLI.
#[derive(Debug, Serialize)]
pub struct Report {
    pub identifier: String,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred: Option<PreferredStream>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub streams: BTreeMap<FormatTag, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<FormatTag, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Resolved,
    Failed,
    Cancelled,
}

#[derive(Debug, Serialize)]
pub struct PreferredStream {
    pub format: FormatTag,
    pub url: String,
}

impl Report {
    pub fn new(identifier: &str, resolution: &Resolution, preference: &[FormatTag]) -> Self {
        let mut report = Report {
            identifier: identifier.to_string(),
            status: ReportStatus::Cancelled,
            title: None,
            preferred: None,
            streams: BTreeMap::new(),
            errors: BTreeMap::new(),
            error: None,
        };

        match resolution {
            Resolution::Resolved(resolved) => {
                report.status = ReportStatus::Resolved;
                report.title = resolved.descriptor().title().map(str::to_string);
                report.preferred = resolved
                    .preferred(preference)
                    .or_else(|| resolved.streams().iter().next().map(|(tag, url)| (*tag, url)))
                    .map(|(format, url)| PreferredStream {
                        format,
                        url: url.to_string(),
                    });
                report.streams = resolved
                    .streams()
                    .iter()
                    .map(|(tag, url)| (*tag, url.to_string()))
                    .collect();
                report.errors = resolved
                    .result()
                    .stream_errors()
                    .iter()
                    .map(|(tag, err)| (*tag, err.to_string()))
                    .collect();
            }
            Resolution::Failed(err) => {
                report.status = ReportStatus::Failed;
                if let Error::NoStreamAvailable(detail) = err.as_ref() {
                    report.errors = detail
                        .errors()
                        .iter()
                        .map(|(tag, err)| (*tag, err.to_string()))
                        .collect();
                }
                report.error = Some(err.to_string());
            }
            Resolution::Cancelled => {}
        }
        report
    }
}

pub fn render(reports: &[Report], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(reports)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(reports)?),
        OutputFormat::Pretty => Ok(render_pretty(reports)),
    }
}

fn render_pretty(reports: &[Report]) -> String {
    let mut out = String::new();
    for report in reports {
        let status = match report.status {
            ReportStatus::Resolved => "OK",
            ReportStatus::Failed => "FAILED",
            ReportStatus::Cancelled => "CANCELLED",
        };
        let _ = write!(out, "[{status}] {}", report.identifier);
        if let Some(title) = &report.title {
            let _ = write!(out, " ({title})");
        }
        out.push('\n');

        if let Some(preferred) = &report.preferred {
            let _ = writeln!(out, "  Preferred: {} -> {}", preferred.format, preferred.url);
        }
        for (tag, url) in &report.streams {
            let _ = writeln!(out, "  + {tag:>5}  {url}");
        }
        for (tag, err) in &report.errors {
            let _ = writeln!(out, "  - {tag:>5}  {err}");
        }
        if report.errors.is_empty() {
            if let Some(err) = &report.error {
                let _ = writeln!(out, "  {err}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use streamgate::{NoStreamAvailable, ProbeError, StatusCode};

    #[test]
    fn failed_resolution_lists_per_format_errors() {
        let mut errors = BTreeMap::new();
        errors.insert(FormatTag::HD_720, ProbeError::http(StatusCode::FORBIDDEN));
        errors.insert(FormatTag::Live, ProbeError::timeout("deadline"));
        let resolution =
            Resolution::Failed(Arc::new(Error::NoStreamAvailable(NoStreamAvailable::new(errors))));

        let report = Report::new("abc", &resolution, &[]);
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.errors.len(), 2);

        let json: serde_json::Value =
            serde_json::from_str(&render(&[report], OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["status"], "failed");
        assert_eq!(json[0]["errors"]["22"], "HTTP 403 Forbidden");
        assert!(json[0].get("streams").is_none());
    }

    #[test]
    fn cancelled_resolution_renders_status_only() {
        let report = Report::new("abc", &Resolution::Cancelled, &[]);
        let text = render(&[report], OutputFormat::Pretty).unwrap();
        assert_eq!(text, "[CANCELLED] abc\n");
    }
}
