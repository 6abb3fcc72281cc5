use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::archive;
use crate::cancel::CancellationToken;
use crate::entry::{Entry, MediaKind};
use crate::fetch::{Fetcher, Transport};
use crate::report::{self, FailedStep, FailureReason, Outcome, OutcomeKind, Reporter, StampStatus, Summary};
use crate::stamp::MetadataStamper;
use crate::state::{self, CompletedTarget, EntryState};
use crate::ThrottledProgress;

/// Smoothing factor for the per-entry duration average
const ETA_ALPHA: f64 = 0.3;

/// Exponentially weighted average of per-entry wall time.
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    alpha: f64,
    average: Option<f64>,
}

impl EtaEstimator {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, average: None }
    }

    pub fn observe(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.average = Some(match self.average {
            Some(avg) => self.alpha * secs + (1.0 - self.alpha) * avg,
            None => secs,
        });
    }

    /// Remaining time for `remaining` entries, once at least one was observed.
    pub fn estimate(&self, remaining: usize) -> Option<Duration> {
        self.average
            .map(|avg| Duration::from_secs_f64(avg * remaining as f64))
    }
}

/// Result of the steps of one entry, before timing is attached.
struct Step {
    kind: MediaKind,
    result: OutcomeKind,
    stamp: StampStatus,
}

impl Step {
    fn failed(kind: MediaKind, step: FailedStep, message: impl std::fmt::Display) -> Self {
        Self {
            kind,
            result: OutcomeKind::Failed(FailureReason::new(step, message)),
            stamp: StampStatus::NotAttempted,
        }
    }
}

/// Write `bytes` to `partial`, then rename over `dest`, so `dest` is either
/// absent or complete.
fn write_atomically(bytes: &[u8], partial: &Path, dest: &Path) -> io::Result<()> {
    let write = || -> io::Result<()> {
        let mut file = File::create(partial)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(partial, dest)
    };
    write().inspect_err(|_| {
        let _ = fs::remove_file(partial);
    })
}

/// Drives entries one at a time: inspect, fetch or skip, extract, stamp, record.
pub struct Pipeline<T: Transport, S: MetadataStamper> {
    root: PathBuf,
    fetcher: Fetcher<T>,
    stamper: S,
    reporter: Reporter,
    restamp: bool,
    eta: EtaEstimator,
}

impl<T: Transport, S: MetadataStamper> Pipeline<T, S> {
    pub fn new(root: PathBuf, fetcher: Fetcher<T>, stamper: S, reporter: Reporter) -> Self {
        Self {
            root,
            fetcher,
            stamper,
            reporter,
            restamp: false,
            eta: EtaEstimator::new(ETA_ALPHA),
        }
    }

    /// Re-stamp entries that are already complete instead of leaving them alone.
    pub fn with_restamp(mut self, restamp: bool) -> Self {
        self.restamp = restamp;
        self
    }

    /// Requests sent so far.
    pub fn requests(&self) -> u64 {
        self.fetcher.requests()
    }

    pub fn stamper(&self) -> &S {
        &self.stamper
    }

    pub fn outcomes(&self) -> &[Outcome] {
        self.reporter.outcomes()
    }

    /// Process `entries` in export order. Returns whether the run was cancelled.
    ///
    /// Only a failure to write the failure log is an error; everything that goes
    /// wrong with an entry becomes its outcome.
    pub fn run(
        &mut self,
        entries: &[Entry],
        cancel: Option<&CancellationToken>,
        progress: &ThrottledProgress,
    ) -> io::Result<bool> {
        let mut ordered: Vec<&Entry> = entries.iter().collect();
        ordered.sort_by_key(|e| e.sequence_index);
        let total = ordered.len();

        for (i, entry) in ordered.into_iter().enumerate() {
            if let Some(token) = cancel {
                if token.check().is_err() {
                    tracing::warn!("Cancelled after {} of {} entries", i, total);
                    return Ok(true);
                }
            }

            let outcome = self.process_entry(entry);
            let skipped = outcome.result == OutcomeKind::SkippedExisting;
            if !skipped {
                self.eta.observe(outcome.elapsed);
            }

            let eta = self
                .eta
                .estimate(total - (i + 1))
                .map(report::format_duration)
                .unwrap_or_else(|| "calculating...".to_string());
            let message = format!("{} {} (ETA: {})", label(&outcome.result), outcome.target, eta);
            if skipped {
                tracing::debug!("[{}/{}] {}", i + 1, total, message);
            } else {
                tracing::info!("[{}/{}] {}", i + 1, total, message);
            }

            // Durable before moving on
            self.reporter.record(outcome)?;
            progress.report("download", i as u64, total as u64, &message);
        }

        Ok(false)
    }

    /// Run one entry through its state machine.
    pub fn process_entry(&mut self, entry: &Entry) -> Outcome {
        let started = Instant::now();
        let step = match state::resolve(entry, &self.root) {
            EntryState::Completed(target) => self.skip(entry, &target),
            EntryState::PartiallyExtracted { container } => self.resume_extraction(entry, &container),
            EntryState::Pending => self.download(entry),
        };

        Outcome {
            sequence_index: entry.sequence_index,
            target: entry.target.stem().to_string(),
            locator: entry.locator.to_string(),
            kind: step.kind,
            result: step.result,
            stamp: step.stamp,
            elapsed: started.elapsed(),
        }
    }

    /// Write the summary report and hand back everything that was recorded.
    pub fn finish(self, summary_path: &Path, malformed: usize, duration: Duration) -> io::Result<(Summary, Vec<Outcome>)> {
        self.reporter.finish(summary_path, malformed, duration)
    }

    fn skip(&mut self, entry: &Entry, target: &CompletedTarget) -> Step {
        let kind = match target {
            CompletedTarget::Folder(_) => MediaKind::ComposedArchive,
            CompletedTarget::File(_) => entry.kind,
        };
        let stamp = if self.restamp {
            self.stamp(target.path(), entry)
        } else {
            StampStatus::NotAttempted
        };
        Step {
            kind,
            result: OutcomeKind::SkippedExisting,
            stamp,
        }
    }

    fn download(&mut self, entry: &Entry) -> Step {
        let bytes = match self.fetcher.fetch(&entry.locator) {
            Ok(bytes) => bytes,
            Err(e) => return Step::failed(entry.kind, FailedStep::Fetch, e),
        };

        if entry.kind == MediaKind::ComposedArchive || archive::is_archive(&bytes) {
            let container = entry.target.container_path(&self.root);
            let partial = entry.target.partial_path(&self.root, MediaKind::ComposedArchive);
            if let Err(e) = write_atomically(&bytes, &partial, &container) {
                return Step::failed(MediaKind::ComposedArchive, FailedStep::Write, e);
            }
            return self.extract_container(entry, &container, &bytes);
        }

        let file = entry.target.file_path(&self.root, entry.kind);
        let partial = entry.target.partial_path(&self.root, entry.kind);
        if let Err(e) = write_atomically(&bytes, &partial, &file) {
            return Step::failed(entry.kind, FailedStep::Write, e);
        }
        Step {
            kind: entry.kind,
            result: OutcomeKind::Downloaded,
            stamp: self.stamp(&file, entry),
        }
    }

    /// Extraction from a container left by an earlier run; no network.
    fn resume_extraction(&mut self, entry: &Entry, container: &Path) -> Step {
        tracing::info!("Resuming extraction of {}", container.display());
        match fs::read(container) {
            Ok(bytes) => self.extract_container(entry, container, &bytes),
            Err(e) => Step::failed(MediaKind::ComposedArchive, FailedStep::Extract, e),
        }
    }

    /// Extract, stamp the folder, then delete the container. On any extraction
    /// error the container stays for the next run or for manual inspection.
    fn extract_container(&mut self, entry: &Entry, container: &Path, bytes: &[u8]) -> Step {
        let folder = entry.target.folder_path(&self.root);
        let members = match archive::extract(bytes, &folder) {
            Ok(members) => members,
            Err(e) => return Step::failed(MediaKind::ComposedArchive, FailedStep::Extract, e),
        };
        tracing::debug!("Extracted {} member(s) into {}", members.len(), folder.display());

        let stamp = self.stamp(&folder, entry);
        if let Err(e) = fs::remove_file(container) {
            return Step::failed(
                MediaKind::ComposedArchive,
                FailedStep::Extract,
                format!("extracted but could not remove {}: {}", container.display(), e),
            );
        }
        Step {
            kind: MediaKind::ComposedArchive,
            result: OutcomeKind::Extracted,
            stamp,
        }
    }

    fn stamp(&self, path: &Path, entry: &Entry) -> StampStatus {
        match self.stamper.stamp(path, &entry.captured_at) {
            Ok(()) => StampStatus::Stamped,
            Err(e) => StampStatus::Failed(e.to_string()),
        }
    }
}

fn label(result: &OutcomeKind) -> &'static str {
    match result {
        OutcomeKind::Downloaded => "Downloaded",
        OutcomeKind::Extracted => "Extracted",
        OutcomeKind::SkippedExisting => "Skipped",
        OutcomeKind::Failed(_) => "Failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::build_zip;
    use crate::entry::{build_work_list, HistoryRecord, SourceLocator};
    use crate::fetch::tests::FakeTransport;
    use crate::fetch::FetchPolicy;
    use crate::report::FailureLog;
    use crate::stamp::StampError;
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use tempfile::{tempdir, TempDir};
    use url::Url;

    /// Records stamped paths; fails for paths whose name contains `fail_on`.
    #[derive(Default)]
    struct RecordingStamper {
        calls: RefCell<Vec<PathBuf>>,
        fail_on: Option<String>,
    }

    impl MetadataStamper for RecordingStamper {
        fn stamp(&self, path: &Path, _captured_at: &DateTime<Utc>) -> Result<(), StampError> {
            self.calls.borrow_mut().push(path.to_path_buf());
            match &self.fail_on {
                Some(pat) if path.to_string_lossy().contains(pat.as_str()) => Err(StampError::Exit {
                    code: Some(1),
                    stderr: "unsupported file".to_string(),
                }),
                _ => Ok(()),
            }
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn record(idx: usize, hour: u32, kind: MediaKind, url: &str) -> HistoryRecord {
        HistoryRecord {
            sequence_index: idx,
            captured_at: at(hour),
            kind,
            locator: SourceLocator::Direct(Url::parse(url).unwrap()),
        }
    }

    fn pipeline(
        dir: &TempDir,
        transport: FakeTransport,
        stamper: RecordingStamper,
    ) -> Pipeline<FakeTransport, RecordingStamper> {
        let policy = FetchPolicy {
            cooldown: Duration::ZERO,
            max_attempts: 2,
            busy_backoff: Duration::ZERO,
        };
        Pipeline::new(
            dir.path().join("out"),
            Fetcher::new(transport, policy),
            stamper,
            Reporter::new(FailureLog::new(dir.path().join("failed_downloads.log"))),
        )
    }

    fn run(p: &mut Pipeline<FakeTransport, RecordingStamper>, entries: &[Entry]) -> bool {
        let cb = |_: &str, _: u64, _: u64, _: &str| {};
        let tp = ThrottledProgress::new(&cb);
        p.run(entries, None, &tp).unwrap()
    }

    /// File names and sizes below `dir`.
    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, u64> {
        fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, u64>) {
            for entry in fs::read_dir(dir).unwrap().flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(base, &path, out);
                } else {
                    let size = entry.metadata().unwrap().len();
                    out.insert(path.strip_prefix(base).unwrap().to_path_buf(), size);
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(dir, dir, &mut out);
        out
    }

    #[test]
    fn test_eta_estimator() {
        let mut eta = EtaEstimator::new(0.5);
        assert_eq!(eta.estimate(10), None);
        eta.observe(Duration::from_secs(4));
        assert_eq!(eta.estimate(3), Some(Duration::from_secs(12)));
        eta.observe(Duration::from_secs(2));
        assert_eq!(eta.estimate(2), Some(Duration::from_secs(6)));
        assert_eq!(eta.estimate(0), Some(Duration::ZERO));
    }

    #[test]
    fn test_image_archive_video_with_corrupt_archive() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 200, b"\xFF\xD8\xFF jpeg");
        transport.respond("https://example.com/2", 200, b"PK\x03\x04 truncated container");
        transport.respond("https://example.com/3", 200, b"\x00\x00\x00\x18ftypmp42");
        let entries = build_work_list(vec![
            record(0, 1, MediaKind::Image, "https://example.com/1"),
            record(1, 2, MediaKind::ComposedArchive, "https://example.com/2"),
            record(2, 3, MediaKind::Video, "https://example.com/3"),
        ]);

        let mut p = pipeline(&dir, transport, RecordingStamper::default());
        assert!(!run(&mut p, &entries));

        let out = dir.path().join("out");
        assert!(out.join("2024-03-01_01-00-00.jpg").is_file());
        assert!(out.join("2024-03-01_03-00-00.mp4").is_file());
        // Raw container stays for inspection, nothing was extracted
        assert_eq!(
            fs::read(out.join("2024-03-01_02-00-00.zip")).unwrap(),
            b"PK\x03\x04 truncated container"
        );
        assert!(!out.join("2024-03-01_02-00-00").exists());

        let stamped = p.stamper().calls.borrow().clone();
        assert_eq!(
            stamped,
            vec![out.join("2024-03-01_01-00-00.jpg"), out.join("2024-03-01_03-00-00.mp4")]
        );

        let log = fs::read_to_string(dir.path().join("failed_downloads.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("FAILED: 2024-03-01_02-00-00"));
        assert!(log.contains("extract failed"));

        let summary_path = dir.path().join("download_summary.txt");
        let (summary, outcomes) = p.finish(&summary_path, 0, Duration::from_secs(1)).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.downloaded(), 2);
        assert_eq!(summary.extracted, 0);
        assert_eq!(summary.failed, 1);
        assert!(matches!(
            &outcomes[1].result,
            OutcomeKind::Failed(FailureReason { step: FailedStep::Extract, .. })
        ));
        assert!(summary_path.is_file());
    }

    #[test]
    fn test_second_run_fetches_nothing() {
        let dir = tempdir().unwrap();
        let bundle = build_zip(&[("main.mp4", b"video"), ("overlay.png", b"png")]);
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 200, b"jpeg");
        transport.respond("https://example.com/2", 200, &bundle);
        let entries = build_work_list(vec![
            record(0, 1, MediaKind::Image, "https://example.com/1"),
            record(1, 2, MediaKind::Video, "https://example.com/2"),
        ]);
        fs::create_dir_all(dir.path().join("out")).unwrap();

        let mut first = pipeline(&dir, transport, RecordingStamper::default());
        run(&mut first, &entries);
        assert_eq!(first.requests(), 2);
        let after_first = snapshot(&dir.path().join("out"));
        assert_eq!(after_first.len(), 3);

        let mut second = pipeline(&dir, FakeTransport::default(), RecordingStamper::default());
        run(&mut second, &entries);
        assert_eq!(second.requests(), 0);
        assert!(second.stamper().calls.borrow().is_empty());
        assert!(second
            .outcomes()
            .iter()
            .all(|o| o.result == OutcomeKind::SkippedExisting));
        assert_eq!(snapshot(&dir.path().join("out")), after_first);
    }

    #[test]
    fn test_zip_download_is_extracted_and_container_removed() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        let bundle = build_zip(&[("media/main.jpg", b"jpeg"), ("media/overlay.png", b"png")]);
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 200, &bundle);
        let entries = build_work_list(vec![record(0, 5, MediaKind::Image, "https://example.com/1")]);

        let mut p = pipeline(&dir, transport, RecordingStamper::default());
        run(&mut p, &entries);

        let out = dir.path().join("out");
        let folder = out.join("2024-03-01_05-00-00");
        assert_eq!(fs::read(folder.join("media/main.jpg")).unwrap(), b"jpeg");
        assert!(!out.join("2024-03-01_05-00-00.zip").exists());
        assert!(!out.join("2024-03-01_05-00-00.jpg").exists());

        let outcome = &p.outcomes()[0];
        assert_eq!(outcome.result, OutcomeKind::Extracted);
        assert_eq!(outcome.kind, MediaKind::ComposedArchive);
        assert_eq!(outcome.stamp, StampStatus::Stamped);
        assert_eq!(*p.stamper().calls.borrow(), vec![folder]);
    }

    #[test]
    fn test_interrupted_extraction_resumes_from_container() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let folder = out.join("2024-03-01_07-00-00");
        fs::create_dir_all(&folder).unwrap();
        // Earlier run died mid-extraction: container intact, member truncated
        let bundle = build_zip(&[("main.mp4", b"full video bytes"), ("overlay.png", b"png")]);
        fs::write(out.join("2024-03-01_07-00-00.zip"), &bundle).unwrap();
        fs::write(folder.join("main.mp4"), b"full").unwrap();

        let entries = build_work_list(vec![record(0, 7, MediaKind::Video, "https://example.com/1")]);

        let mut p = pipeline(&dir, FakeTransport::default(), RecordingStamper::default());
        run(&mut p, &entries);
        assert_eq!(p.requests(), 0);
        assert_eq!(p.outcomes()[0].result, OutcomeKind::Extracted);
        assert_eq!(fs::read(folder.join("main.mp4")).unwrap(), b"full video bytes");
        assert!(folder.join("overlay.png").is_file());
        assert!(!out.join("2024-03-01_07-00-00.zip").exists());

        let mut again = pipeline(&dir, FakeTransport::default(), RecordingStamper::default());
        run(&mut again, &entries);
        assert_eq!(again.requests(), 0);
        assert_eq!(again.outcomes()[0].result, OutcomeKind::SkippedExisting);
        assert_eq!(again.outcomes()[0].kind, MediaKind::ComposedArchive);
    }

    #[test]
    fn test_corrupt_container_is_retried_without_network() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("2024-03-01_09-00-00.zip"), b"PK\x03\x04 junk").unwrap();
        let entries = build_work_list(vec![record(0, 9, MediaKind::ComposedArchive, "https://example.com/1")]);

        let mut p = pipeline(&dir, FakeTransport::default(), RecordingStamper::default());
        run(&mut p, &entries);
        assert_eq!(p.requests(), 0);
        assert!(p.outcomes()[0].is_failed());
        assert!(out.join("2024-03-01_09-00-00.zip").is_file());
    }

    #[test]
    fn test_fetch_failure_does_not_stop_the_run() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 403, b"");
        transport.respond("https://example.com/2", 500, b"");
        transport.respond("https://example.com/2", 500, b"");
        transport.respond("https://example.com/3", 200, b"jpeg");
        let entries = build_work_list(vec![
            record(0, 1, MediaKind::Image, "https://example.com/1"),
            record(1, 2, MediaKind::Image, "https://example.com/2"),
            record(2, 3, MediaKind::Image, "https://example.com/3"),
        ]);

        let mut p = pipeline(&dir, transport, RecordingStamper::default());
        run(&mut p, &entries);

        let results: Vec<_> = p.outcomes().iter().map(|o| o.is_failed()).collect();
        assert_eq!(results, vec![true, true, false]);
        assert_eq!(p.requests(), 4);
        assert!(dir.path().join("out/2024-03-01_03-00-00.jpg").is_file());
        assert!(!dir.path().join("out/2024-03-01_01-00-00.jpg").exists());

        let log = fs::read_to_string(dir.path().join("failed_downloads.log")).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("URL: https://example.com/2"));
    }

    #[test]
    fn test_empty_download_is_a_failure() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 200, b"");
        transport.respond("https://example.com/1", 200, b"");
        let entries = build_work_list(vec![record(0, 8, MediaKind::Image, "https://example.com/1")]);

        let mut p = pipeline(&dir, transport, RecordingStamper::default());
        run(&mut p, &entries);
        let outcome = &p.outcomes()[0];
        assert!(matches!(
            &outcome.result,
            OutcomeKind::Failed(FailureReason { step: FailedStep::Fetch, .. })
        ));
        assert!(p.stamper().calls.borrow().is_empty());
        assert!(!dir.path().join("out/2024-03-01_08-00-00.jpg").exists());
        assert_eq!(state::resolve(&entries[0], &dir.path().join("out")), EntryState::Pending);
    }

    #[test]
    fn test_stamp_failure_keeps_file_and_restamp_retries_it() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 200, b"mp4");
        let entries = build_work_list(vec![record(0, 4, MediaKind::Video, "https://example.com/1")]);

        let failing = RecordingStamper {
            fail_on: Some(".mp4".to_string()),
            ..Default::default()
        };
        let mut p = pipeline(&dir, transport, failing);
        run(&mut p, &entries);
        let outcome = &p.outcomes()[0];
        assert_eq!(outcome.result, OutcomeKind::Downloaded);
        assert!(outcome.is_unstamped());
        assert!(dir.path().join("out/2024-03-01_04-00-00.mp4").is_file());
        let log = fs::read_to_string(dir.path().join("failed_downloads.log")).unwrap();
        assert!(log.contains("UNSTAMPED: 2024-03-01_04-00-00"));

        // Default resume leaves completed entries alone
        let mut plain = pipeline(&dir, FakeTransport::default(), RecordingStamper::default());
        run(&mut plain, &entries);
        assert!(plain.stamper().calls.borrow().is_empty());
        assert_eq!(plain.outcomes()[0].stamp, StampStatus::NotAttempted);

        let mut restamp = pipeline(&dir, FakeTransport::default(), RecordingStamper::default()).with_restamp(true);
        run(&mut restamp, &entries);
        assert_eq!(restamp.requests(), 0);
        assert_eq!(restamp.stamper().calls.borrow().len(), 1);
        assert_eq!(restamp.outcomes()[0].result, OutcomeKind::SkippedExisting);
        assert_eq!(restamp.outcomes()[0].stamp, StampStatus::Stamped);
    }

    #[test]
    fn test_same_timestamp_entries_get_separate_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 200, b"first");
        transport.respond("https://example.com/2", 200, b"second");
        let entries = build_work_list(vec![
            record(0, 6, MediaKind::Image, "https://example.com/1"),
            record(1, 6, MediaKind::Image, "https://example.com/2"),
        ]);

        let mut p = pipeline(&dir, transport, RecordingStamper::default());
        run(&mut p, &entries);
        assert_eq!(fs::read(dir.path().join("out/2024-03-01_06-00-00.jpg")).unwrap(), b"first");
        assert_eq!(fs::read(dir.path().join("out/2024-03-01_06-00-00_1.jpg")).unwrap(), b"second");
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        let transport = FakeTransport::default();
        transport.respond("https://example.com/1", 200, b"jpeg");
        let entries = build_work_list(vec![record(0, 1, MediaKind::Image, "https://example.com/1")]);

        let token = CancellationToken::new();
        token.cancel();
        let mut p = pipeline(&dir, transport, RecordingStamper::default());
        let cb = |_: &str, _: u64, _: u64, _: &str| {};
        let tp = ThrottledProgress::new(&cb);
        assert!(p.run(&entries, Some(&token), &tp).unwrap());
        assert_eq!(p.requests(), 0);
        assert!(p.outcomes().is_empty());
    }
}
