use serde::Deserialize;

use crate::entry::{HistoryRecord, MediaKind};

use super::{parse_locator, parse_timestamp, MalformedEntry};

#[derive(Deserialize)]
struct Export {
    #[serde(rename = "Saved Media", default)]
    saved_media: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct SavedMedia {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Media Type", default)]
    media_type: String,
    /// Link that has to be resolved into the asset URL first
    #[serde(rename = "Download Link", default)]
    download_link: Option<String>,
    /// Direct asset URL (newer exports)
    #[serde(rename = "Media Download Url", default)]
    media_download_url: Option<String>,
}

/// Parse the `Saved Media` list of a JSON export.
///
/// A document that is not JSON at all is an error; individual records that do not
/// match the expected shape are reported per record.
pub fn parse_json(content: &str) -> Result<Vec<Result<HistoryRecord, MalformedEntry>>, serde_json::Error> {
    let export: Export = serde_json::from_str(content)?;

    Ok(export
        .saved_media
        .into_iter()
        .enumerate()
        .map(|(sequence_index, value)| parse_record(sequence_index, value))
        .collect())
}

fn parse_record(sequence_index: usize, value: serde_json::Value) -> Result<HistoryRecord, MalformedEntry> {
    let media: SavedMedia =
        serde_json::from_value(value).map_err(|e| MalformedEntry::new(sequence_index, e.to_string()))?;

    let captured_at = parse_timestamp(&media.date)
        .ok_or_else(|| MalformedEntry::new(sequence_index, format!("unparsable date '{}'", media.date)))?;

    let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
    let locator = match (non_empty(media.media_download_url), non_empty(media.download_link)) {
        (Some(direct), _) => parse_locator(&direct, false),
        (None, Some(link)) => parse_locator(&link, true),
        (None, None) => Err("no download link".to_string()),
    }
    .map_err(|reason| MalformedEntry::new(sequence_index, reason))?;

    Ok(HistoryRecord {
        sequence_index,
        captured_at,
        kind: MediaKind::from_label(&media.media_type),
        locator,
    })
}
