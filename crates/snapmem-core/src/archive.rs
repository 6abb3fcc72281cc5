use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Component, Path, PathBuf};

use encoding_rs::SHIFT_JIS;
use zip::ZipArchive;

/// Local file header / empty-archive signatures
const ZIP_MAGIC: [&[u8]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The container is not a readable zip; its bytes are left on disk.
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("extraction incomplete: {} missing or truncated", .0.display())]
    Incomplete(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Whether the downloaded bytes are a zip container rather than a single asset.
pub fn is_archive(bytes: &[u8]) -> bool {
    ZIP_MAGIC.iter().any(|magic| bytes.starts_with(magic))
}

/// Decode zip member name, trying UTF-8 first, then Shift_JIS
fn decode_member_name<R: std::io::Read>(member: &zip::read::ZipFile<'_, R>) -> String {
    let raw = member.name_raw();

    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    let (decoded, _, had_errors) = SHIFT_JIS.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

/// Relative path for a member name, or None if it would escape the target.
fn member_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let path = Path::new(&normalized);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Extract every file member of a zip container into `target_dir`.
///
/// The container is validated before anything is written. After writing, each
/// member is checked on disk against its declared size; only then are the
/// extracted paths returned. Nothing is ever deleted here.
pub fn extract(bytes: &[u8], target_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    let mut members: Vec<(PathBuf, u64)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let member = archive.by_index(i).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        if member.is_dir() {
            continue;
        }
        let name = decode_member_name(&member);
        let relative = member_path(&name)
            .ok_or_else(|| ArchiveError::Corrupt(format!("unsafe member name '{}'", name)))?;
        members.push((relative, member.size()));
    }
    if members.is_empty() {
        return Err(ArchiveError::Corrupt("archive contains no files".to_string()));
    }

    fs::create_dir_all(target_dir)?;
    let mut written = Vec::with_capacity(members.len());
    let mut index = 0;
    for i in 0..archive.len() {
        let mut member = archive.by_index(i).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        if member.is_dir() {
            continue;
        }
        let (relative, _) = &members[index];
        index += 1;

        let dest = target_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)?;
        // Decompression and CRC failures surface as read errors here
        io::copy(&mut member, &mut out).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                ArchiveError::Corrupt(format!("{}: {}", relative.display(), e))
            }
            _ => ArchiveError::Io(e),
        })?;
        out.flush()?;
        out.sync_all()?;
        written.push(dest);
    }

    verify(target_dir, &members)?;
    Ok(written)
}

/// Every listed member must exist with its declared size.
fn verify(target_dir: &Path, members: &[(PathBuf, u64)]) -> Result<(), ArchiveError> {
    for (relative, size) in members {
        let path = target_dir.join(relative);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() == *size => {}
            _ => return Err(ArchiveError::Incomplete(path)),
        }
    }
    Ok(())
}
