//! Migration driver.
//!
//! Walks the archive candidates one at a time, skips those already in the
//! ledger, extracts the rest into memory and hands their files to the upload
//! pool. Supports stopping between archives.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use ramdeploy_archive::{
    ArchiveCandidate, ExtractedArchive, ExtractionError, Extractor, scan_archives,
};
use ramdeploy_ledger::ProgressLedger;
use ramdeploy_transfer::{FailureReport, RemoteTarget, UploadPool, UploadTask, remote_root_for};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::types::{PipelineConfig, PipelineEvent, RunSummary};

/// Drives a whole migration run.
pub struct MigrationDriver {
    config: PipelineConfig,
    extractor: Arc<dyn Extractor>,
    pool: UploadPool,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
    cancel: CancellationToken,
}

impl MigrationDriver {
    pub fn new(config: PipelineConfig, extractor: Arc<dyn Extractor>, pool: UploadPool) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            extractor,
            pool,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are buffered until read, so the run never waits on the
    /// receiver; drain it while the run progresses to keep memory flat.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PipelineEvent>> {
        self.events_rx.take()
    }

    /// Token that stops the run before the next archive.
    ///
    /// An archive whose extraction already started is always finished.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the migration over every candidate in the working directory.
    ///
    /// Only a ledger failure or an unreadable working directory abort the
    /// run; everything else ends up in the returned summary.
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        // Nobody took the receiver: close the channel so events are not buffered.
        drop(self.events_rx.take());

        let mut ledger = ProgressLedger::open(&self.config.ledger_path)?;
        let candidates = scan_archives(&self.config.working_dir, &self.config.extensions)
            .map_err(|source| PipelineError::Scan {
                path: self.config.working_dir.clone(),
                source,
            })?;

        info!(
            dir = %self.config.working_dir.display(),
            archives = candidates.len(),
            recorded = ledger.len(),
            "scan complete"
        );

        let mut summary = RunSummary {
            archives_found: candidates.len(),
            ..RunSummary::default()
        };

        for candidate in &candidates {
            if self.cancel.is_cancelled() {
                info!("stop requested, remaining archives stay pending");
                summary.cancelled = true;
                break;
            }
            self.process(candidate, &mut ledger, &mut summary).await?;
        }

        info!(
            committed = summary.archives_committed,
            skipped = summary.archives_skipped,
            extraction_failures = summary.extraction_failures,
            files_uploaded = summary.files_uploaded,
            files_failed = summary.files_failed,
            bytes = summary.bytes_uploaded,
            "All done"
        );
        self.emit(PipelineEvent::Finished(summary.clone()));

        Ok(summary)
    }

    async fn process(
        &self,
        candidate: &ArchiveCandidate,
        ledger: &mut ProgressLedger,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let id = &candidate.id;

        if ledger.is_done(id) {
            info!(
                archive = %id,
                ledger = %ledger.path().display(),
                "already uploaded, remove its line from the ledger to upload it again"
            );
            summary.archives_skipped += 1;
            self.emit(PipelineEvent::ArchiveSkipped {
                archive_id: id.clone(),
            });
            return Ok(());
        }

        info!(archive = %id, path = %candidate.path.display(), "extracting archive");
        self.emit(PipelineEvent::ExtractionStarted {
            archive_id: id.clone(),
        });

        let archive = match self.extract(&candidate.path).await {
            Ok(a) => a,
            Err(e) => {
                let err_msg = e.to_string();
                error!(archive = %id, error = %err_msg, "failed to read archive, skipping it");
                summary.extraction_failures += 1;
                summary
                    .failures
                    .push(FailureReport::extraction(id.clone(), err_msg.clone()));
                self.emit(PipelineEvent::ExtractionFailed {
                    archive_id: id.clone(),
                    error: err_msg,
                });
                return Ok(());
            }
        };

        let files = archive.len();
        let bytes = archive.total_bytes();
        info!(archive = %id, files, bytes, "archive extracted");
        self.emit(PipelineEvent::Extracted {
            archive_id: id.clone(),
            files,
            bytes,
        });

        let (stale_dirs, entry_paths): (BTreeSet<String>, BTreeSet<String>) =
            if self.config.clean_stale_extractions {
                let files = archive.files();
                (
                    files
                        .iter()
                        .filter_map(|f| f.path.top_level_dir())
                        .map(str::to_string)
                        .collect(),
                    files.iter().map(|f| f.path.to_string()).collect(),
                )
            } else {
                (BTreeSet::new(), BTreeSet::new())
            };

        let remote_root = remote_root_for(&self.config.remote_root, &candidate.stem);
        let tasks: Vec<UploadTask> = archive
            .into_files()
            .into_iter()
            .map(|file| UploadTask {
                archive_id: id.clone(),
                remote_root: remote_root.clone(),
                file,
            })
            .collect();

        let reports = self.pool.run(tasks).await;

        let mut uploaded = 0;
        let mut failed = 0;
        for report in reports {
            match FailureReport::from_upload(&report) {
                None => {
                    uploaded += 1;
                    summary.files_uploaded += 1;
                    summary.bytes_uploaded += report.bytes;
                    self.emit(PipelineEvent::FileUploaded {
                        archive_id: report.archive_id,
                        file: report.file.unwrap_or_default(),
                        remote_path: report
                            .target
                            .as_ref()
                            .map(RemoteTarget::full_path)
                            .unwrap_or_default(),
                        bytes: report.bytes,
                    });
                }
                Some(failure) => {
                    failed += 1;
                    summary.files_failed += 1;
                    summary.failures.push(failure.clone());
                    self.emit(PipelineEvent::FileFailed(failure));
                }
            }
        }

        // Every task resolved; the archive is recorded even if some failed.
        ledger.commit(id)?;
        summary.archives_committed += 1;
        if failed > 0 {
            warn!(
                archive = %id,
                uploaded,
                failed,
                "archive recorded with failed files, upload them manually"
            );
        } else {
            info!(archive = %id, files = uploaded, remote_root = %remote_root, "archive uploaded");
        }
        self.emit(PipelineEvent::ArchiveCommitted {
            archive_id: id.clone(),
            uploaded,
            failed,
        });

        self.remove_stale_extractions(&stale_dirs, &entry_paths);
        Ok(())
    }

    async fn extract(&self, path: &Path) -> Result<ExtractedArchive, ExtractionError> {
        let extractor = Arc::clone(&self.extractor);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|e| ExtractionError::Task(e.to_string()))?
    }

    /// Deletes `<working_dir>/<dir>` for each of the archive's top-level
    /// folders, but only when every file below it is an entry of the archive.
    fn remove_stale_extractions(&self, dirs: &BTreeSet<String>, entries: &BTreeSet<String>) {
        for name in dirs {
            let dir = self.config.working_dir.join(name);
            let is_dir = std::fs::symlink_metadata(&dir).is_ok_and(|m| m.is_dir());
            if !is_dir {
                continue;
            }
            match holds_only_entries(&dir, name, entries) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(dir = %dir.display(), "keeping directory with files not from the archive");
                    continue;
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot inspect directory, keeping it");
                    continue;
                }
            }
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => info!(dir = %dir.display(), "removed stale extraction directory"),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to remove stale extraction directory")
                }
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// True when every regular file below `dir` is listed in `entries` as
/// `<prefix>/<relative path>`. Symlinks and other special files count as
/// foreign.
fn holds_only_entries(
    dir: &Path,
    prefix: &str,
    entries: &BTreeSet<String>,
) -> std::io::Result<bool> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            return Ok(false);
        };
        let relative = format!("{prefix}/{name}");
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if !holds_only_entries(&entry.path(), &relative, entries)? {
                return Ok(false);
            }
        } else if !(file_type.is_file() && entries.contains(&relative)) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramdeploy_archive::ArchiveExtractor;
    use ramdeploy_transfer::{
        ConnectionParams, ErrorKind, FtpConnector, FtpSession, PoolOptions,
    };
    use std::collections::HashMap;
    use std::fs;
    use std::io::{self, Write};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use zip::write::SimpleFileOptions;

    /// In-memory FTP server shared by every session.
    #[derive(Default)]
    struct Remote {
        connects: AtomicUsize,
        stored: Mutex<HashMap<String, Vec<u8>>>,
        /// File names whose `STOR` fails.
        fail_files: Vec<String>,
    }

    struct MockConnector(Arc<Remote>);

    struct MockSession {
        remote: Arc<Remote>,
        cwd: String,
    }

    impl FtpConnector for MockConnector {
        fn connect(&self, _params: &ConnectionParams) -> io::Result<Box<dyn FtpSession>> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                remote: Arc::clone(&self.0),
                cwd: "/".into(),
            }))
        }
    }

    impl FtpSession for MockSession {
        fn change_dir(&mut self, directory: &str) -> io::Result<()> {
            self.cwd = directory.to_string();
            Ok(())
        }

        fn store(&mut self, file_name: &str, data: &[u8], _block_size: usize) -> io::Result<u64> {
            if self.remote.fail_files.iter().any(|f| f == file_name) {
                return Err(io::Error::other("426 transfer aborted"));
            }
            let path = format!("{}/{}", self.cwd.trim_end_matches('/'), file_name);
            self.remote.stored.lock().unwrap().insert(path, data.to_vec());
            Ok(data.len() as u64)
        }

        fn quit(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    /// Real extractor that counts how often it was asked to read.
    #[derive(Default)]
    struct CountingExtractor {
        calls: AtomicUsize,
    }

    impl Extractor for CountingExtractor {
        fn extract(&self, path: &Path) -> Result<ExtractedArchive, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ArchiveExtractor.extract(path)
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn game_archive(dir: &Path) {
        write_zip(
            &dir.join("GameName.zip"),
            &[
                ("GameName/default.xbe", b"XBE-DATA"),
                ("GameName/media/intro.xmv", b"MOVIE"),
            ],
        );
    }

    fn driver(
        dir: &Path,
        remote: &Arc<Remote>,
        extractor: &Arc<CountingExtractor>,
    ) -> MigrationDriver {
        let pool = UploadPool::new(
            Arc::new(MockConnector(Arc::clone(remote))),
            ConnectionParams::new("192.168.1.80", "xbox", "xbox"),
            PoolOptions::default(),
        );
        let extractor: Arc<dyn Extractor> = extractor.clone();
        MigrationDriver::new(PipelineConfig::new(dir), extractor, pool)
    }

    fn ledger_lines(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join(crate::DEFAULT_LEDGER_FILE))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn uploads_archive_and_commits() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());

        let summary = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(summary.archives_found, 1);
        assert_eq!(summary.archives_committed, 1);
        assert_eq!(summary.files_uploaded, 2);
        assert_eq!(summary.bytes_uploaded, 13);
        assert!(summary.is_clean());

        let stored = remote.stored.lock().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["/F/Games/GameName/GameName/default.xbe"], b"XBE-DATA");
        assert_eq!(stored["/F/Games/GameName/GameName/media/intro.xmv"], b"MOVIE");
        assert_eq!(ledger_lines(tmp.path()), ["GameName.zip"]);
    }

    #[tokio::test]
    async fn recorded_archive_is_not_touched() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        fs::write(tmp.path().join(crate::DEFAULT_LEDGER_FILE), "GameName.zip\n").unwrap();
        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());

        let summary = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(summary.archives_skipped, 1);
        assert_eq!(summary.archives_committed, 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(remote.connects.load(Ordering::SeqCst), 0);
        assert_eq!(ledger_lines(tmp.path()), ["GameName.zip"]);
    }

    #[tokio::test]
    async fn missing_ledger_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());

        let summary = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(summary.archives_found, 0);
        assert!(tmp.path().join(crate::DEFAULT_LEDGER_FILE).is_file());
        assert!(ledger_lines(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn second_run_skips_committed_archive() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());

        driver(tmp.path(), &remote, &extractor).run().await.unwrap();
        let second = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(second.archives_skipped, 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.connects.load(Ordering::SeqCst), 2);
        assert_eq!(ledger_lines(tmp.path()), ["GameName.zip"]);
    }

    #[tokio::test]
    async fn unreadable_archive_is_retried_next_run() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("Broken.7z"), b"not an archive").unwrap();
        game_archive(tmp.path());
        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());

        let summary = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(summary.extraction_failures, 1);
        assert_eq!(summary.archives_committed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, ErrorKind::Extraction);
        assert_eq!(summary.failures[0].archive_id.as_deref(), Some("Broken.7z"));
        assert_eq!(ledger_lines(tmp.path()), ["GameName.zip"]);

        let again = driver(tmp.path(), &remote, &extractor).run().await.unwrap();
        assert_eq!(again.extraction_failures, 1);
        assert_eq!(again.archives_skipped, 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn partial_failure_still_commits() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let remote = Arc::new(Remote {
            fail_files: vec!["intro.xmv".into()],
            ..Remote::default()
        });
        let extractor = Arc::new(CountingExtractor::default());

        let summary = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.archives_committed, 1);
        let failure = &summary.failures[0];
        assert_eq!(failure.kind, ErrorKind::Transfer);
        assert_eq!(failure.file.as_deref(), Some("GameName/media/intro.xmv"));
        assert_eq!(
            failure.remote_path.as_deref(),
            Some("/F/Games/GameName/GameName/media")
        );
        assert_eq!(ledger_lines(tmp.path()), ["GameName.zip"]);
    }

    #[tokio::test]
    async fn cancelled_run_leaves_archives_pending() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());

        let mut driver = driver(tmp.path(), &remote, &extractor);
        driver.cancel_token().cancel();
        let summary = driver.run().await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.archives_committed, 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert!(ledger_lines(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn emits_events_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());

        let mut driver = driver(tmp.path(), &remote, &extractor);
        let mut events = driver.take_events().unwrap();
        assert!(driver.take_events().is_none());
        driver.run().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }

        assert!(matches!(seen[0], PipelineEvent::ExtractionStarted { .. }));
        assert!(matches!(
            seen[1],
            PipelineEvent::Extracted { files: 2, bytes: 13, .. }
        ));
        let uploaded = seen
            .iter()
            .filter(|e| matches!(e, PipelineEvent::FileUploaded { .. }))
            .count();
        assert_eq!(uploaded, 2);
        assert!(matches!(
            seen[seen.len() - 2],
            PipelineEvent::ArchiveCommitted { uploaded: 2, failed: 0, .. }
        ));
        assert!(matches!(seen.last(), Some(PipelineEvent::Finished(_))));
    }

    #[tokio::test]
    async fn removes_stale_extraction_directory() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let stale = tmp.path().join("GameName");
        fs::create_dir_all(stale.join("media")).unwrap();
        fs::write(stale.join("default.xbe"), b"old").unwrap();

        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());
        driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn keeps_directory_holding_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let holder = tmp.path().join("GameName");
        fs::create_dir_all(&holder).unwrap();
        game_archive(&holder);

        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());
        let summary = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(summary.archives_committed, 1);
        assert!(holder.join("GameName.zip").is_file());
    }

    #[tokio::test]
    async fn keeps_directory_with_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let folder = tmp.path().join("GameName");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("default.xbe"), b"old").unwrap();
        fs::write(folder.join("savegame.dat"), b"mine").unwrap();

        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());
        let summary = driver(tmp.path(), &remote, &extractor).run().await.unwrap();

        assert_eq!(summary.archives_committed, 1);
        assert!(folder.join("savegame.dat").is_file());
        assert!(folder.join("default.xbe").is_file());
    }

    #[tokio::test]
    async fn unread_events_do_not_stall_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..300).map(|i| format!("Big/data/part{i}.bin")).collect();
        let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
        write_zip(&tmp.path().join("Big.zip"), &entries);

        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());
        let mut driver = driver(tmp.path(), &remote, &extractor);
        let mut events = driver.take_events().unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(30), driver.run())
            .await
            .expect("run stalled on unread events")
            .unwrap();

        assert_eq!(summary.files_uploaded, 300);
        assert_eq!(ledger_lines(tmp.path()), ["Big.zip"]);

        let mut uploaded = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::FileUploaded { .. }) {
                uploaded += 1;
            }
        }
        assert_eq!(uploaded, 300);
    }

    #[tokio::test]
    async fn stale_cleanup_can_be_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        game_archive(tmp.path());
        let stale = tmp.path().join("GameName");
        fs::create_dir_all(&stale).unwrap();

        let remote = Arc::new(Remote::default());
        let extractor = Arc::new(CountingExtractor::default());
        let mut driver = driver(tmp.path(), &remote, &extractor);
        driver.config.clean_stale_extractions = false;
        driver.run().await.unwrap();

        assert!(stale.is_dir());
    }
}
