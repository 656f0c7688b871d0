//! FTP upload of in-memory files with bounded concurrency.
//!
//! Every file is uploaded by its own worker over its own FTP session. The
//! [`UploadPool`] caps how many workers run at once and returns only after
//! every submitted task resolved.

mod chunked;
mod pool;
mod remote_path;
mod report;
mod session;
mod types;
mod worker;

pub use chunked::write_blocks;
pub use pool::{PoolOptions, UploadPool};
pub use remote_path::{PathMapper, remote_root_for};
pub use report::{ErrorKind, FailureReport, render_failure};
pub use session::{FtpConnector, FtpSession, SuppaFtpConnector};
pub use types::{ConnectionParams, RemoteTarget, UploadReport, UploadTask};
pub use worker::UploadWorker;

/// Default block size for binary stores: 100 KiB.
///
/// Smaller blocks trade throughput for resilience on constrained devices.
pub const DEFAULT_BLOCK_SIZE: usize = 100 * 1024;

/// Default number of simultaneous FTP sessions.
pub const DEFAULT_WORKERS: usize = 2;

/// Default FTP control port.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Errors produced by a single upload task.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("cannot connect to {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("cannot enter remote directory {directory}: {reason}")]
    Navigation { directory: String, reason: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("upload task aborted: {0}")]
    Aborted(String),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Navigation { .. } => ErrorKind::Navigation,
            Self::Transfer(_) => ErrorKind::Transfer,
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }
}
