use regex::Regex;
use std::sync::LazyLock;

use crate::entry::{HistoryRecord, MediaKind};

use super::{decode_entities, parse_locator, parse_timestamp, MalformedEntry};

static ROW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(td|th)\b[^>]*>(.*?)</(?:td|th)>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ONCLICK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"downloadMemories\(\s*'([^']+)'(?:\s*,\s*[^,)]*,\s*(true|false))?").unwrap()
});
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["'](https?://[^"']+)["']"#).unwrap());

struct Cell<'a> {
    header: bool,
    html: &'a str,
}

fn cell_text(html: &str) -> String {
    decode_entities(&TAG_RE.replace_all(html, "")).trim().to_string()
}

/// Parse the memories table of an HTML export.
///
/// Columns: date, media type, location, download link. Header rows are skipped;
/// each data row consumes one sequence index whether or not it parses.
pub fn parse_html(content: &str) -> Vec<Result<HistoryRecord, MalformedEntry>> {
    let mut records = Vec::new();
    let mut sequence_index = 0;

    for row in ROW_RE.captures_iter(content) {
        let Some(row_html) = row.get(1) else {
            continue;
        };
        let cells: Vec<Cell> = CELL_RE
            .captures_iter(row_html.as_str())
            .filter_map(|c| {
                Some(Cell {
                    header: c.get(1)?.as_str().eq_ignore_ascii_case("th"),
                    html: c.get(2)?.as_str(),
                })
            })
            .collect();

        if cells.is_empty() || cells.iter().all(|c| c.header) {
            continue;
        }

        records.push(parse_row(sequence_index, &cells));
        sequence_index += 1;
    }

    records
}

fn parse_row(sequence_index: usize, cells: &[Cell]) -> Result<HistoryRecord, MalformedEntry> {
    if cells.len() < 4 {
        return Err(MalformedEntry::new(
            sequence_index,
            format!("expected 4 columns, found {}", cells.len()),
        ));
    }

    let date_text = cell_text(cells[0].html);
    let captured_at = parse_timestamp(&date_text)
        .ok_or_else(|| MalformedEntry::new(sequence_index, format!("unparsable date '{}'", date_text)))?;

    let kind = MediaKind::from_label(&cell_text(cells[1].html));

    let link_html = cells[3].html;
    let link = if let Some(caps) = ONCLICK_RE.captures(link_html) {
        // Third argument is `isGetRequest`; `false` means the link must be resolved first.
        let deferred = caps.get(2).map_or(false, |m| m.as_str() == "false");
        parse_locator(&caps[1], deferred)
    } else if let Some(caps) = HREF_RE.captures(link_html) {
        parse_locator(&caps[1], false)
    } else {
        Err("no download link".to_string())
    };
    let locator = link.map_err(|reason| MalformedEntry::new(sequence_index, reason))?;

    Ok(HistoryRecord {
        sequence_index,
        captured_at,
        kind,
        locator,
    })
}
