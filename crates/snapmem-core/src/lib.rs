pub mod archive;
pub mod cancel;
pub mod config;
pub mod entry;
pub mod fetch;
pub mod history;
pub mod pipeline;
pub mod report;
pub mod stamp;
pub mod state;

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::fetch::{FetchPolicy, Fetcher, HttpTransport};
use crate::pipeline::Pipeline;
use crate::report::{FailureLog, Outcome, Reporter, Summary};
use crate::stamp::ExifToolStamper;

fn default_exiftool() -> String {
    "exiftool".to_string()
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_busy_backoff_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_tool_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Exported memories history (HTML or JSON)
    #[serde(alias = "input_html")]
    pub history: PathBuf,
    /// Download root
    #[serde(alias = "download_folder")]
    pub output: PathBuf,
    /// ExifTool path or name on PATH
    #[serde(default = "default_exiftool")]
    pub exiftool: String,
    #[serde(default)]
    pub failure_log: Option<PathBuf>,
    #[serde(default)]
    pub summary_file: Option<PathBuf>,
    /// Minimum spacing between two requests
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_busy_backoff_secs")]
    pub busy_backoff_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Stamp completed entries again instead of skipping them outright
    #[serde(default)]
    pub restamp: bool,
}

impl RunOptions {
    pub fn new(history: PathBuf, output: PathBuf, exiftool: impl Into<String>) -> Self {
        Self {
            history,
            output,
            exiftool: exiftool.into(),
            failure_log: None,
            summary_file: None,
            cooldown_secs: default_cooldown_secs(),
            max_attempts: default_max_attempts(),
            busy_backoff_secs: default_busy_backoff_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            restamp: false,
        }
    }

    /// Anchor relative paths at `base`. A bare tool name is left for `PATH` lookup.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        anchor(&mut self.history);
        anchor(&mut self.output);
        if let Some(p) = self.failure_log.as_mut() {
            anchor(p);
        }
        if let Some(p) = self.summary_file.as_mut() {
            anchor(p);
        }

        let tool = Path::new(&self.exiftool);
        if tool.is_relative() && tool.components().count() > 1 {
            self.exiftool = base.join(tool).to_string_lossy().into_owned();
        }
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.failure_log
            .clone()
            .unwrap_or_else(|| self.output.join("failed_downloads.log"))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.summary_file
            .clone()
            .unwrap_or_else(|| self.output.join("download_summary.txt"))
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_attempts: self.max_attempts.max(1),
            busy_backoff: Duration::from_secs(self.busy_backoff_secs),
        }
    }
}

/// What a finished (or cancelled) run hands back.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: Summary,
    pub outcomes: Vec<Outcome>,
    /// Stopped early on request; entries not reached are left for the next run
    pub cancelled: bool,
    /// Network requests sent, resolution requests included
    pub requests: u64,
}

/// Control options for a run.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    /// Cancellation token, checked between entries.
    pub cancel_token: Option<cancel::CancellationToken>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: cancel::CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// Progress callback: (stage, current, total, message)
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter, emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Cell<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: Cell::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            if let Some(last) = self.last_emit.get() {
                if last.elapsed().as_millis() < 200 {
                    return;
                }
            }
            self.last_emit.set(Some(Instant::now()));
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run a full download pass with progress reporting.
pub fn run(options: &RunOptions, progress_callback: &ProgressCallback) -> anyhow::Result<RunReport> {
    run_with_control(options, &RunControl::default(), progress_callback)
}

/// Run a full download pass with progress reporting and cancellation.
///
/// Setup problems (unreadable history, missing ExifTool, unwritable output)
/// are errors. Per-entry problems never are: they end up in the report.
pub fn run_with_control(
    options: &RunOptions,
    control: &RunControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<RunReport> {
    let started = Instant::now();
    let tp = ThrottledProgress::new(progress_callback);

    let preflight = config::preflight(options)?;
    let history = history::load_history(&options.history)?;
    tracing::info!(
        "Found {} memories in {} ({} malformed record(s) skipped)",
        history.entries.len(),
        options.history.display(),
        history.malformed
    );

    let transport = HttpTransport::new(Duration::from_secs(options.request_timeout_secs))
        .context("Failed to create HTTP client")?;
    let fetcher = Fetcher::new(transport, options.fetch_policy());
    let stamper = ExifToolStamper::new(preflight.tool, Duration::from_secs(options.tool_timeout_secs));
    let reporter = Reporter::new(FailureLog::new(options.failure_log_path()));
    let mut pipeline = Pipeline::new(options.output.clone(), fetcher, stamper, reporter).with_restamp(options.restamp);

    let cancelled = pipeline
        .run(&history.entries, control.cancel_token.as_ref(), &tp)
        .with_context(|| format!("Failed to write {}", options.failure_log_path().display()))?;
    let requests = pipeline.requests();

    let summary_path = options.summary_path();
    let (summary, outcomes) = pipeline
        .finish(&summary_path, history.malformed, started.elapsed())
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    Ok(RunReport {
        summary,
        outcomes,
        cancelled,
        requests,
    })
}
