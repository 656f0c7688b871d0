//! Bounded-concurrency upload pool.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::remote_path::PathMapper;
use crate::report::FailureReport;
use crate::session::FtpConnector;
use crate::types::{ConnectionParams, UploadReport, UploadTask};
use crate::worker::UploadWorker;
use crate::{DEFAULT_BLOCK_SIZE, DEFAULT_WORKERS};

/// Pool settings, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum simultaneous workers (and FTP sessions).
    pub workers: usize,
    /// Block size for binary stores.
    pub block_size: usize,
    pub mapper: PathMapper,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            block_size: DEFAULT_BLOCK_SIZE,
            mapper: PathMapper::default(),
        }
    }
}

/// Runs upload tasks with at most `workers` of them in flight.
pub struct UploadPool {
    connector: Arc<dyn FtpConnector>,
    params: Arc<ConnectionParams>,
    options: PoolOptions,
}

impl UploadPool {
    /// Creates a pool. A worker count of 0 is raised to 1.
    pub fn new(
        connector: Arc<dyn FtpConnector>,
        params: ConnectionParams,
        options: PoolOptions,
    ) -> Self {
        let options = PoolOptions {
            workers: options.workers.max(1),
            ..options
        };
        Self {
            connector,
            params: Arc::new(params),
            options,
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Uploads every task and waits until all of them resolved.
    ///
    /// Each task holds a permit while its worker runs, so no more than
    /// `workers` FTP sessions are open at once. Failures are logged and
    /// returned in the reports; they never stop sibling tasks. Buffers are
    /// released as soon as their task resolves.
    pub async fn run(&self, tasks: Vec<UploadTask>) -> Vec<UploadReport> {
        let total = tasks.len();
        let batch_archive = tasks
            .first()
            .map(|t| t.archive_id.clone())
            .unwrap_or_default();
        let permits = Arc::new(Semaphore::new(self.options.workers));
        let mut set = JoinSet::new();

        for task in tasks {
            let permits = Arc::clone(&permits);
            let connector = Arc::clone(&self.connector);
            let params = Arc::clone(&self.params);
            let PoolOptions {
                block_size, mapper, ..
            } = self.options;

            set.spawn(async move {
                let archive_id = task.archive_id.clone();
                let label = task.file.path.to_string();
                let target = mapper.map(&task.file.path, &task.remote_root);

                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => {
                        return UploadReport::aborted(
                            archive_id,
                            Some(label),
                            Some(target),
                            e.to_string(),
                        );
                    }
                };

                let joined = tokio::task::spawn_blocking(move || {
                    UploadWorker::new(connector.as_ref(), &params, mapper, block_size).upload(task)
                })
                .await;

                match joined {
                    Ok(report) => report,
                    Err(e) => UploadReport::aborted(archive_id, Some(label), Some(target), e.to_string()),
                }
            });
        }

        let mut reports = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    UploadReport::aborted(batch_archive.clone(), None, None, e.to_string())
                }
            };
            log_report(&report);
            reports.push(report);
        }

        reports
    }
}

fn log_report(report: &UploadReport) {
    match FailureReport::from_upload(report) {
        None => info!(
            archive = %report.archive_id,
            file = report.file.as_deref().unwrap_or("?"),
            remote_dir = report.target.as_ref().map(|t| t.directory.as_str()).unwrap_or("?"),
            bytes = report.bytes,
            "file uploaded"
        ),
        Some(failure) => error!(
            archive = %report.archive_id,
            file = report.file.as_deref().unwrap_or("?"),
            remote_dir = failure.remote_path.as_deref().unwrap_or("?"),
            kind = %failure.kind,
            error = %failure.detail,
            "file upload failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FtpSession;
    use crate::{ErrorKind, UploadError};
    use ramdeploy_archive::{ArchivePath, ExtractedFile};
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records stored files and the peak number of open sessions.
    #[derive(Default)]
    struct MockConnector {
        open: AtomicUsize,
        peak: AtomicUsize,
        connects: AtomicUsize,
        stored: Mutex<HashMap<String, Vec<u8>>>,
        fail_files: Vec<String>,
        panic_files: Vec<String>,
        delay: Duration,
    }

    struct MockSession {
        connector: Arc<MockConnector>,
        cwd: String,
    }

    /// Wrapper so the connector can hand out `Arc`s of itself.
    struct SharedConnector(Arc<MockConnector>);

    impl FtpConnector for SharedConnector {
        fn connect(&self, _params: &ConnectionParams) -> io::Result<Box<dyn FtpSession>> {
            let inner = &self.0;
            inner.connects.fetch_add(1, Ordering::SeqCst);
            let now = inner.open.fetch_add(1, Ordering::SeqCst) + 1;
            inner.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                connector: Arc::clone(inner),
                cwd: String::new(),
            }))
        }
    }

    impl FtpSession for MockSession {
        fn change_dir(&mut self, directory: &str) -> io::Result<()> {
            self.cwd = directory.to_string();
            Ok(())
        }

        fn store(&mut self, file_name: &str, data: &[u8], _block_size: usize) -> io::Result<u64> {
            std::thread::sleep(self.connector.delay);
            if self.connector.panic_files.iter().any(|f| f == file_name) {
                panic!("worker blew up on {file_name}");
            }
            if self.connector.fail_files.iter().any(|f| f == file_name) {
                return Err(io::Error::other("451 local error"));
            }
            let path = format!("{}/{}", self.cwd.trim_end_matches('/'), file_name);
            self.connector
                .stored
                .lock()
                .unwrap()
                .insert(path, data.to_vec());
            Ok(data.len() as u64)
        }

        fn quit(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for MockSession {
        fn drop(&mut self) {
            self.connector.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn tasks(count: usize) -> Vec<UploadTask> {
        (0..count)
            .map(|i| UploadTask {
                archive_id: "Halo.7z".into(),
                remote_root: "/F/Games/Halo/".into(),
                file: ExtractedFile::new(
                    ArchivePath::parse(&format!("media/file{i}.bin")).unwrap(),
                    vec![i as u8; 16],
                ),
            })
            .collect()
    }

    fn pool(mock: &Arc<MockConnector>, workers: usize) -> UploadPool {
        UploadPool::new(
            Arc::new(SharedConnector(Arc::clone(mock))),
            ConnectionParams::new("192.168.1.80", "xbox", "xbox"),
            PoolOptions {
                workers,
                ..PoolOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn uploads_every_task() {
        let mock = Arc::new(MockConnector::default());
        let reports = pool(&mock, 2).run(tasks(5)).await;

        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(UploadReport::is_success));

        let stored = mock.stored.lock().unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored["/F/Games/Halo/media/file3.bin"], vec![3u8; 16]);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn never_exceeds_worker_limit() {
        let mock = Arc::new(MockConnector {
            delay: Duration::from_millis(20),
            ..MockConnector::default()
        });
        let reports = pool(&mock, 2).run(tasks(8)).await;

        assert_eq!(reports.len(), 8);
        let peak = mock.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency {peak} exceeded 2");
        assert!(peak >= 1);
        assert_eq!(mock.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_worker_is_sequential() {
        let mock = Arc::new(MockConnector {
            delay: Duration::from_millis(5),
            ..MockConnector::default()
        });
        pool(&mock, 1).run(tasks(4)).await;
        assert_eq!(mock.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_workers_is_raised_to_one() {
        let mock = Arc::new(MockConnector::default());
        let p = pool(&mock, 0);
        assert_eq!(p.options().workers, 1);
        assert_eq!(p.run(tasks(2)).await.len(), 2);
    }

    #[tokio::test]
    async fn failure_does_not_stop_siblings() {
        let mock = Arc::new(MockConnector {
            fail_files: vec!["file1.bin".into()],
            ..MockConnector::default()
        });
        let reports = pool(&mock, 2).run(tasks(4)).await;

        assert_eq!(reports.len(), 4);
        let failed: Vec<_> = reports.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].file.as_deref(), Some("media/file1.bin"));
        assert!(matches!(failed[0].result, Err(UploadError::Transfer(_))));
        assert_eq!(mock.stored.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn panicking_worker_keeps_context() {
        let mock = Arc::new(MockConnector {
            panic_files: vec!["file0.bin".into()],
            ..MockConnector::default()
        });
        let reports = pool(&mock, 2).run(tasks(3)).await;

        assert_eq!(reports.len(), 3);
        let aborted = reports.iter().find(|r| !r.is_success()).unwrap();
        assert_eq!(aborted.result.as_ref().unwrap_err().kind(), ErrorKind::Aborted);
        assert_eq!(aborted.archive_id, "Halo.7z");
        assert_eq!(aborted.file.as_deref(), Some("media/file0.bin"));
        assert_eq!(
            aborted.target.as_ref().map(|t| t.directory.as_str()),
            Some("/F/Games/Halo/media")
        );
        assert_eq!(mock.stored.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let mock = Arc::new(MockConnector::default());
        assert!(pool(&mock, 2).run(Vec::new()).await.is_empty());
        assert_eq!(mock.connects.load(Ordering::SeqCst), 0);
    }
}
