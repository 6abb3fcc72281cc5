pub mod html;
pub mod json;

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use url::Url;

use crate::config::SetupError;
use crate::entry::{self, Entry, HistoryRecord, SourceLocator};

/// A record that could not be turned into an entry. Skipped, never fatal.
#[derive(Debug, thiserror::Error)]
#[error("record #{sequence_index}: {reason}")]
pub struct MalformedEntry {
    pub sequence_index: usize,
    pub reason: String,
}

impl MalformedEntry {
    pub fn new(sequence_index: usize, reason: impl Into<String>) -> Self {
        Self {
            sequence_index,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    Html,
    Json,
}

impl HistoryFormat {
    /// Pick the parser from the file extension, falling back to sniffing the content.
    pub fn detect(path: &Path, content: &str) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => HistoryFormat::Json,
            Some("html") | Some("htm") => HistoryFormat::Html,
            _ if content.trim_start().starts_with('{') => HistoryFormat::Json,
            _ => HistoryFormat::Html,
        }
    }
}

/// Entries extracted from an export document.
#[derive(Debug)]
pub struct History {
    pub entries: Vec<Entry>,
    /// Records skipped because they could not be parsed
    pub malformed: usize,
}

/// Read and parse the export document at `path`.
pub fn load_history(path: &Path) -> Result<History, SetupError> {
    let content = std::fs::read_to_string(path).map_err(|source| SetupError::HistoryUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let format = HistoryFormat::detect(path, &content);
    parse_history(&content, format).map_err(|e| SetupError::HistoryFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Parse an export document already in memory.
pub fn parse_history(content: &str, format: HistoryFormat) -> Result<History, serde_json::Error> {
    let records = match format {
        HistoryFormat::Html => html::parse_html(content),
        HistoryFormat::Json => json::parse_json(content)?,
    };

    let mut good = Vec::with_capacity(records.len());
    let mut malformed = 0;
    for record in records {
        match record {
            Ok(r) => good.push(r),
            Err(e) => {
                tracing::warn!("Skipping malformed {}", e);
                malformed += 1;
            }
        }
    }

    Ok(History {
        entries: entry::build_work_list(good),
        malformed,
    })
}

/// Parse an export date such as `2025-11-14 11:38:59 UTC`.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    let cleaned = cleaned.strip_suffix("UTC").unwrap_or(cleaned).trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Parse a download link into a locator; only http(s) is accepted.
pub(crate) fn parse_locator(raw: &str, deferred: bool) -> Result<SourceLocator, String> {
    let decoded = decode_entities(raw.trim());
    let url = Url::parse(&decoded).map_err(|e| format!("invalid download link: {}", e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("unsupported link scheme: {}", url.scheme()));
    }
    Ok(if deferred {
        SourceLocator::Deferred(url)
    } else {
        SourceLocator::Direct(url)
    })
}

pub(crate) fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
