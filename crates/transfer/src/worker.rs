//! Single-file upload over a dedicated FTP session.

use tracing::{debug, warn};

use crate::UploadError;
use crate::remote_path::PathMapper;
use crate::session::FtpConnector;
use crate::types::{ConnectionParams, UploadReport, UploadTask};

/// Uploads one task on its own session.
///
/// Blocking: the pool runs it on the blocking thread pool.
pub struct UploadWorker<'a> {
    connector: &'a dyn FtpConnector,
    params: &'a ConnectionParams,
    mapper: PathMapper,
    block_size: usize,
}

impl<'a> UploadWorker<'a> {
    pub fn new(
        connector: &'a dyn FtpConnector,
        params: &'a ConnectionParams,
        mapper: PathMapper,
        block_size: usize,
    ) -> Self {
        Self {
            connector,
            params,
            mapper,
            block_size,
        }
    }

    /// Runs the task to completion and reports the outcome.
    ///
    /// Consumes the task; its buffer is released when this returns, whatever
    /// the outcome. Failures are returned in the report, never as a panic.
    pub fn upload(&self, task: UploadTask) -> UploadReport {
        let UploadTask {
            archive_id,
            remote_root,
            file,
        } = task;
        let target = self.mapper.map(&file.path, &remote_root);
        let label = file.path.to_string();

        let mut session = match self.connector.connect(self.params) {
            Ok(s) => s,
            Err(e) => {
                return UploadReport {
                    archive_id,
                    file: Some(label),
                    target: Some(target),
                    bytes: 0,
                    result: Err(UploadError::Connection {
                        address: self.params.address(),
                        reason: e.to_string(),
                    }),
                };
            }
        };

        let outcome = session
            .change_dir(&target.directory)
            .map_err(|e| UploadError::Navigation {
                directory: target.directory.clone(),
                reason: e.to_string(),
            })
            .and_then(|()| {
                debug!(
                    archive = %archive_id,
                    file = %label,
                    remote_dir = %target.directory,
                    bytes = file.data.len(),
                    "storing file"
                );
                session
                    .store(&target.file_name, &file.data, self.block_size)
                    .map_err(|e| UploadError::Transfer(e.to_string()))
            });

        if let Err(e) = session.quit() {
            warn!(archive = %archive_id, file = %label, error = %e, "failed to quit FTP session gracefully");
        }

        let (bytes, result) = match outcome {
            Ok(n) => (n, Ok(())),
            Err(e) => (0, Err(e)),
        };

        UploadReport {
            archive_id,
            file: Some(label),
            target: Some(target),
            bytes,
            result,
        }
    }
}
