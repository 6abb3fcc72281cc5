use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;

use crate::entry::MediaKind;

/// Step at which an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStep {
    Fetch,
    Write,
    Extract,
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedStep::Fetch => write!(f, "fetch"),
            FailedStep::Write => write!(f, "write"),
            FailedStep::Extract => write!(f, "extract"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub step: FailedStep,
    pub message: String,
}

impl FailureReason {
    pub fn new(step: FailedStep, message: impl fmt::Display) -> Self {
        Self {
            step,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    Downloaded,
    Extracted,
    SkippedExisting,
    Failed(FailureReason),
}

/// Stamping is tracked apart from the download: an unstamped file is still kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampStatus {
    Stamped,
    NotAttempted,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub sequence_index: usize,
    /// Name stem of the entry's target
    pub target: String,
    pub locator: String,
    /// Kind as stored, after archive detection
    pub kind: MediaKind,
    pub result: OutcomeKind,
    pub stamp: StampStatus,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.result, OutcomeKind::Failed(_))
    }

    pub fn is_unstamped(&self) -> bool {
        matches!(self.stamp, StampStatus::Failed(_))
    }
}

/// Format a duration as `H:MM:SS`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Aggregate counts over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub images: usize,
    pub videos: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unstamped: usize,
    pub restamped: usize,
    /// Export records that could not be parsed
    pub malformed: usize,
    pub duration: Duration,
}

impl Summary {
    pub fn from_outcomes(outcomes: &[Outcome], malformed: usize, duration: Duration) -> Self {
        let mut s = Summary {
            total: outcomes.len(),
            malformed,
            duration,
            ..Default::default()
        };
        for o in outcomes {
            match &o.result {
                OutcomeKind::Downloaded if o.kind == MediaKind::Video => s.videos += 1,
                OutcomeKind::Downloaded => s.images += 1,
                OutcomeKind::Extracted => s.extracted += 1,
                OutcomeKind::SkippedExisting => {
                    s.skipped += 1;
                    if o.stamp == StampStatus::Stamped {
                        s.restamped += 1;
                    }
                }
                OutcomeKind::Failed(_) => s.failed += 1,
            }
            if o.is_unstamped() {
                s.unstamped += 1;
            }
        }
        s
    }

    pub fn downloaded(&self) -> usize {
        self.images + self.videos
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(40);
        let mut text = format!(
            "{rule}\nFINAL SUMMARY\n{rule}\n\
             Processed: {}\n\
             Images:    {}\n\
             Videos:    {}\n\
             Archives:  {} (extracted & deleted)\n\
             Skipped:   {}\n\
             Failed:    {}\n\
             Unstamped: {}\n",
            self.total, self.images, self.videos, self.extracted, self.skipped, self.failed, self.unstamped,
        );
        if self.restamped > 0 {
            text.push_str(&format!("Restamped: {}\n", self.restamped));
        }
        if self.malformed > 0 {
            text.push_str(&format!("Malformed: {} (skipped while reading the export)\n", self.malformed));
        }
        text.push_str(&format!("Duration:  {}\n{rule}\n", format_duration(self.duration)));
        text
    }
}

/// Append-only log, each line synced to disk before returning.
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        file.sync_data()
    }
}

/// Collects outcomes and writes the failure log as they come in.
pub struct Reporter {
    failure_log: FailureLog,
    outcomes: Vec<Outcome>,
}

impl Reporter {
    pub fn new(failure_log: FailureLog) -> Self {
        Self {
            failure_log,
            outcomes: Vec::new(),
        }
    }

    /// Record one outcome. Failures reach the log before this returns.
    pub fn record(&mut self, outcome: Outcome) -> io::Result<()> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let OutcomeKind::Failed(reason) = &outcome.result {
            tracing::warn!("Entry #{} ({}) {}", outcome.sequence_index, outcome.target, reason);
            self.failure_log.append(&format!(
                "[{}] FAILED: {} | {} | URL: {}",
                now, outcome.target, reason, outcome.locator
            ))?;
        }
        if let StampStatus::Failed(reason) = &outcome.stamp {
            tracing::warn!("Entry #{} ({}) kept but not stamped: {}", outcome.sequence_index, outcome.target, reason);
            self.failure_log.append(&format!(
                "[{}] UNSTAMPED: {} | {} | URL: {}",
                now, outcome.target, reason, outcome.locator
            ))?;
        }
        self.outcomes.push(outcome);
        Ok(())
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Write the summary report once, at the end of the run.
    pub fn finish(
        self,
        summary_path: &Path,
        malformed: usize,
        duration: Duration,
    ) -> io::Result<(Summary, Vec<Outcome>)> {
        let summary = Summary::from_outcomes(&self.outcomes, malformed, duration);
        if let Some(parent) = summary_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(summary_path, summary.render())?;
        Ok((summary, self.outcomes))
    }
}
