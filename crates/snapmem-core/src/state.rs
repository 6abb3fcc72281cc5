use std::fs;
use std::path::{Path, PathBuf};

use crate::entry::Entry;

/// Where a finished entry lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletedTarget {
    File(PathBuf),
    Folder(PathBuf),
}

impl CompletedTarget {
    pub fn path(&self) -> &Path {
        match self {
            CompletedTarget::File(p) | CompletedTarget::Folder(p) => p,
        }
    }
}

/// Progress of an entry, derived from the filesystem alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Completed(CompletedTarget),
    /// The container is still on disk: extraction never finished, re-extract it.
    PartiallyExtracted { container: PathBuf },
    Pending,
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).map_or(false, |m| m.is_file() && m.len() > 0)
}

/// Whether `dir` holds at least one non-empty file at any depth.
fn has_content(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    // file_type() does not follow symlinks, so a link cycle cannot recurse
    entries.flatten().any(|entry| match entry.file_type() {
        Ok(ft) if ft.is_dir() => has_content(&entry.path()),
        Ok(_) => non_empty_file(&entry.path()),
        Err(_) => false,
    })
}

/// Work out how far `entry` got in earlier runs under `root`. Read-only.
///
/// The archive container is deleted only once extraction is verified, so its
/// presence marks an unfinished extraction whatever the folder looks like.
pub fn resolve(entry: &Entry, root: &Path) -> EntryState {
    let container = entry.target.container_path(root);
    if non_empty_file(&container) {
        return EntryState::PartiallyExtracted { container };
    }

    let file = entry.target.file_path(root, entry.kind);
    if non_empty_file(&file) {
        return EntryState::Completed(CompletedTarget::File(file));
    }

    let folder = entry.target.folder_path(root);
    if folder.is_dir() && has_content(&folder) {
        return EntryState::Completed(CompletedTarget::Folder(folder));
    }

    EntryState::Pending
}
