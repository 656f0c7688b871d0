use std::fmt;

use ramdeploy_archive::ExtractedFile;

use crate::{DEFAULT_FTP_PORT, UploadError};

/// Host and credentials of the remote device.
///
/// Treated as opaque strings; no validation happens here.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Host name or IP address, optionally with `:port`.
    pub host: String,
    /// Port used when `host` carries none.
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_FTP_PORT,
            username: username.into(),
            password: password.into(),
        }
    }

    /// `host:port` suitable for socket resolution.
    pub fn address(&self) -> String {
        let has_port = match self.host.rsplit_once(':') {
            // Bracketed IPv6 with a port, or a plain host with a port.
            Some((h, p)) => {
                !p.is_empty()
                    && p.bytes().all(|b| b.is_ascii_digit())
                    && (h.ends_with(']') || !h.contains(':'))
            }
            None => false,
        };
        if has_port {
            self.host.clone()
        } else if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

/// Where one file lands on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTarget {
    pub directory: String,
    pub file_name: String,
}

impl RemoteTarget {
    /// Directory and file name joined with `/`.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.directory.trim_end_matches('/'), self.file_name)
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

/// One file's pending transfer. Consumed by exactly one worker.
#[derive(Debug)]
pub struct UploadTask {
    pub archive_id: String,
    /// Remote directory that mirrors the archive root.
    pub remote_root: String,
    pub file: ExtractedFile,
}

/// Outcome of one upload task.
#[derive(Debug)]
pub struct UploadReport {
    pub archive_id: String,
    /// Path inside the archive, when it is known.
    pub file: Option<String>,
    pub target: Option<RemoteTarget>,
    /// Bytes handed to the data connection.
    pub bytes: u64,
    pub result: Result<(), UploadError>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Report for a task whose worker never produced one.
    pub(crate) fn aborted(
        archive_id: String,
        file: Option<String>,
        target: Option<RemoteTarget>,
        reason: String,
    ) -> Self {
        Self {
            archive_id,
            file,
            target,
            bytes: 0,
            result: Err(UploadError::Aborted(reason)),
        }
    }
}
