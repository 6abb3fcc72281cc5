use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use url::Url;

/// Format used for on-disk names: `2025-11-14_11-38-59`
const STEM_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    /// Multi-asset bundle delivered as a single zip container ("multi-snap")
    ComposedArchive,
}

impl MediaKind {
    /// Classify the media type label of an export record.
    /// Anything that is not a video is stored as an image.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        if label.contains("video") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::ComposedArchive => "zip",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::ComposedArchive => write!(f, "archive"),
        }
    }
}

/// Where the bytes of an entry come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// A single GET returns the asset.
    Direct(Url),
    /// A GET returns the asset URL as text, which is then fetched.
    Deferred(Url),
}

impl SourceLocator {
    pub fn url(&self) -> &Url {
        match self {
            SourceLocator::Direct(url) | SourceLocator::Deferred(url) => url,
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Name stem shared by every on-disk form of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetName(String);

impl TargetName {
    /// Stem for the `ordinal`-th entry captured at `captured_at` (0 = first).
    pub fn new(captured_at: &DateTime<Utc>, ordinal: u32) -> Self {
        let base = captured_at.format(STEM_FORMAT).to_string();
        if ordinal == 0 {
            Self(base)
        } else {
            Self(format!("{}_{}", base, ordinal))
        }
    }

    pub fn stem(&self) -> &str {
        &self.0
    }

    /// Final file for a single-asset entry, e.g. `<stem>.jpg`.
    pub fn file_path(&self, root: &Path, kind: MediaKind) -> PathBuf {
        root.join(format!("{}.{}", self.0, kind.extension()))
    }

    /// Downloaded zip container, kept until extraction is verified.
    pub fn container_path(&self, root: &Path) -> PathBuf {
        self.file_path(root, MediaKind::ComposedArchive)
    }

    /// Folder an archive is extracted into.
    pub fn folder_path(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }

    /// In-flight download, renamed into place once fully written.
    pub fn partial_path(&self, root: &Path, kind: MediaKind) -> PathBuf {
        root.join(format!("{}.{}.part", self.0, kind.extension()))
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One memory record as read from the export, before target assignment.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub sequence_index: usize,
    pub captured_at: DateTime<Utc>,
    pub kind: MediaKind,
    pub locator: SourceLocator,
}

#[derive(Debug, Clone)]
pub struct Entry {
    /// Position in the export document
    pub sequence_index: usize,
    /// Capture time, source of truth for stamping
    pub captured_at: DateTime<Utc>,
    /// Kind declared by the export
    pub kind: MediaKind,
    pub locator: SourceLocator,
    pub target: TargetName,
}

/// Turn export records into the ordered work list.
///
/// Records are ordered by `sequence_index`; entries whose capture times fall in
/// the same second get `_1`, `_2`, ... suffixes in that order, so the same
/// export always yields the same names.
pub fn build_work_list(mut records: Vec<HistoryRecord>) -> Vec<Entry> {
    records.sort_by_key(|r| r.sequence_index);

    // Keyed on the formatted stem: names drop sub-second precision
    let mut seen: HashMap<String, u32> = HashMap::new();
    records
        .into_iter()
        .map(|r| {
            let counter = seen
                .entry(r.captured_at.format(STEM_FORMAT).to_string())
                .or_insert(0);
            let target = TargetName::new(&r.captured_at, *counter);
            *counter += 1;
            Entry {
                sequence_index: r.sequence_index,
                captured_at: r.captured_at,
                kind: r.kind,
                locator: r.locator,
                target,
            }
        })
        .collect()
}
