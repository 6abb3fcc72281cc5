use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stamp;
use crate::RunOptions;

/// Default configuration filename, looked up in the working directory
pub const CONFIG_FILENAME: &str = "configuration.json";

/// Errors that abort a run before any entry is processed.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("cannot read configuration {}: {source}", .path.display())]
    ConfigUnreadable { path: PathBuf, source: io::Error },
    #[error("invalid configuration {}: {reason}", .path.display())]
    ConfigInvalid { path: PathBuf, reason: String },
    #[error("cannot read history file {}: {source}", .path.display())]
    HistoryUnreadable { path: PathBuf, source: io::Error },
    #[error("history file {} is not a valid export: {reason}", .path.display())]
    HistoryFormat { path: PathBuf, reason: String },
    #[error("metadata tool '{tool}' not found; put it on PATH or configure an absolute path")]
    ToolNotFound { tool: String },
    #[error("metadata tool {} is not usable: {reason}", .path.display())]
    ToolUnusable { path: PathBuf, reason: String },
    #[error("download folder {} is not writable: {source}", .path.display())]
    OutputNotWritable { path: PathBuf, source: io::Error },
}

/// Load run options from a JSON configuration file.
///
/// Relative paths are taken relative to the directory holding the file.
pub fn load_config(path: &Path) -> Result<RunOptions, SetupError> {
    let file = File::open(path).map_err(|source| SetupError::ConfigUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut options: RunOptions =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| SetupError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    options.resolve_relative_to(base);
    Ok(options)
}

/// Result of the pre-flight check.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub tool: PathBuf,
    pub tool_version: String,
}

/// Locate the metadata tool, either as a path or as a name on `PATH`.
pub fn resolve_tool(tool: &str) -> Result<PathBuf, SetupError> {
    which::which(tool).map_err(|_| SetupError::ToolNotFound {
        tool: tool.to_string(),
    })
}

/// Check everything a run depends on: the history file, the metadata tool and the
/// download folder. Creates the download folder if missing.
pub fn preflight(options: &RunOptions) -> Result<Preflight, SetupError> {
    File::open(&options.history).map_err(|source| SetupError::HistoryUnreadable {
        path: options.history.clone(),
        source,
    })?;

    let tool = resolve_tool(&options.exiftool)?;
    let timeout = Duration::from_secs(options.tool_timeout_secs);
    let output = stamp::run_tool(&tool, &["-ver"], timeout).map_err(|e| SetupError::ToolUnusable {
        path: tool.clone(),
        reason: e.to_string(),
    })?;
    if !output.success {
        return Err(SetupError::ToolUnusable {
            path: tool,
            reason: format!("`-ver` failed: {}", output.stderr.trim()),
        });
    }
    let tool_version = output.stdout.trim().to_string();
    tracing::info!("Metadata tool ready: {} (version {})", tool.display(), tool_version);

    check_writable(&options.output)?;
    Ok(Preflight { tool, tool_version })
}

fn check_writable(dir: &Path) -> Result<(), SetupError> {
    let probe = || -> io::Result<()> {
        if !dir.exists() {
            tracing::info!("Creating download folder {}", dir.display());
        }
        fs::create_dir_all(dir)?;
        let test_file = dir.join(".write_test");
        File::create(&test_file)?.write_all(b"test")?;
        fs::remove_file(&test_file)
    };
    probe().map_err(|source| SetupError::OutputNotWritable {
        path: dir.to_path_buf(),
        source,
    })
}
