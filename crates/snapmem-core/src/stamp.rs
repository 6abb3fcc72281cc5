use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use filetime::FileTime;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Writes capture-time metadata onto a file or every file below a directory.
pub trait MetadataStamper {
    fn stamp(&self, path: &Path, captured_at: &DateTime<Utc>) -> Result<(), StampError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StampError {
    #[error("failed to start {}: {source}", .tool.display())]
    Spawn { tool: PathBuf, source: io::Error },
    #[error("{} timed out after {:.1}s", .tool.display(), .timeout.as_secs_f64())]
    TimedOut { tool: PathBuf, timeout: Duration },
    #[error("exit code {}: {}", .code.map_or("none".to_string(), |c| c.to_string()), .stderr.trim())]
    Exit { code: Option<i32>, stderr: String },
    #[error("tool reported: {}", .0.trim())]
    ToolReported(String),
    #[error("cannot set file times on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{failed} of {total} files in {} not stamped (first: {first})", .dir.display())]
    Members {
        dir: PathBuf,
        failed: usize,
        total: usize,
        first: String,
    },
}

/// Captured result of an external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `program` with `args`, killing it if it is still running after `timeout`.
pub fn run_tool<I, S>(program: &Path, args: I, timeout: Duration) -> Result<ToolOutput, StampError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| StampError::Spawn {
            tool: program.to_path_buf(),
            source,
        })?;

    // Drain both pipes so a chatty child never blocks on a full buffer
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(StampError::TimedOut {
                    tool: program.to_path_buf(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                return Err(StampError::Spawn {
                    tool: program.to_path_buf(),
                    source,
                })
            }
        }
    };

    let collect = |h: Option<JoinHandle<String>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok(ToolOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
        success: status.success(),
        code: status.code(),
    })
}

/// Set modification and access time of `path` to the capture instant.
pub fn set_times(path: &Path, captured_at: &DateTime<Utc>) -> Result<(), StampError> {
    let ft = FileTime::from_unix_time(captured_at.timestamp(), 0);
    filetime::set_file_times(path, ft, ft).map_err(|source| StampError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively collect regular files and subdirectories below `dir`.
fn collect_tree(dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    // Symlinks are neither followed nor stamped
    for entry in entries.flatten() {
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if ft.is_dir() {
            collect_tree(&path, files, dirs);
            dirs.push(path);
        } else if ft.is_file() {
            files.push(path);
        }
    }
}

/// Stamps through ExifTool, then fixes the filesystem times with `filetime`.
#[derive(Debug, Clone)]
pub struct ExifToolStamper {
    program: PathBuf,
    timeout: Duration,
}

impl ExifToolStamper {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    fn args(path: &Path, captured_at: &DateTime<Utc>) -> Vec<OsString> {
        // EXIF dates carry no zone: write local wall time, QuickTime atoms get UTC
        let local = captured_at
            .with_timezone(&Local)
            .format("%Y:%m:%d %H:%M:%S")
            .to_string();
        let mut args: Vec<OsString> = vec![
            "-overwrite_original".into(),
            "-q".into(),
            "-q".into(),
            "-m".into(),
            "-api".into(),
            "QuickTimeUTC=1".into(),
            format!("-AllDates={}", local).into(),
        ];
        if cfg!(windows) {
            args.push(format!("-FileCreateDate={}", local).into());
        }
        args.push(path.as_os_str().to_os_string());
        args
    }

    fn stamp_file(&self, path: &Path, captured_at: &DateTime<Utc>) -> Result<(), StampError> {
        tracing::debug!("Stamping {} with {}", path.display(), captured_at);
        let result = run_tool(&self.program, Self::args(path, captured_at), self.timeout).and_then(|out| {
            if !out.success {
                Err(StampError::Exit {
                    code: out.code,
                    stderr: out.stderr,
                })
            } else if out.stderr.contains("Error") {
                Err(StampError::ToolReported(out.stderr))
            } else {
                Ok(())
            }
        });

        // The tool rewrites the file, so times are fixed afterwards either way
        set_times(path, captured_at)?;
        result
    }

    fn stamp_dir(&self, dir: &Path, captured_at: &DateTime<Utc>) -> Result<(), StampError> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        collect_tree(dir, &mut files, &mut dirs);
        files.sort();

        let mut failed = 0;
        let mut first = None;
        for file in &files {
            if let Err(e) = self.stamp_file(file, captured_at) {
                tracing::warn!("Could not stamp {}: {}", file.display(), e);
                failed += 1;
                first.get_or_insert_with(|| e.to_string());
            }
        }

        // Deepest directories were pushed first
        dirs.push(dir.to_path_buf());
        for d in &dirs {
            if let Err(e) = set_times(d, captured_at) {
                tracing::debug!("{}", e);
            }
        }

        match first {
            Some(first) => Err(StampError::Members {
                dir: dir.to_path_buf(),
                failed,
                total: files.len(),
                first,
            }),
            None => Ok(()),
        }
    }
}

impl MetadataStamper for ExifToolStamper {
    fn stamp(&self, path: &Path, captured_at: &DateTime<Utc>) -> Result<(), StampError> {
        if path.is_dir() {
            self.stamp_dir(path, captured_at)
        } else {
            self.stamp_file(path, captured_at)
        }
    }
}
