//! Human-readable failure reports.

use std::fmt;

use crate::types::UploadReport;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Extraction,
    Connection,
    Navigation,
    Transfer,
    Aborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Extraction => "extraction",
            Self::Connection => "connection",
            Self::Navigation => "navigation",
            Self::Transfer => "transfer",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A failure with whatever context could be gathered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub archive_id: Option<String>,
    /// Path inside the archive.
    pub file: Option<String>,
    /// Remote directory that needs manual intervention.
    pub remote_path: Option<String>,
    pub detail: String,
}

impl FailureReport {
    /// Failure to read a whole archive.
    pub fn extraction(archive_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Extraction,
            archive_id: Some(archive_id.into()),
            file: None,
            remote_path: None,
            detail: detail.into(),
        }
    }

    /// Builds a report from a failed upload, `None` if it succeeded.
    pub fn from_upload(report: &UploadReport) -> Option<Self> {
        let err = report.result.as_ref().err()?;
        Some(Self {
            kind: err.kind(),
            archive_id: Some(report.archive_id.clone()).filter(|id| !id.is_empty()),
            file: report.file.clone(),
            remote_path: report.target.as_ref().map(|t| t.directory.clone()),
            detail: err.to_string(),
        })
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_failure(self))
    }
}

/// Renders a failure for the operator.
///
/// Mentions the archive, the file and the remote directory to fix by hand
/// whenever they are known, and falls back to a generic message otherwise.
pub fn render_failure(report: &FailureReport) -> String {
    let FailureReport {
        kind,
        archive_id,
        file,
        remote_path,
        detail,
    } = report;

    match (kind, archive_id, file, remote_path) {
        (ErrorKind::Extraction, Some(archive), _, _) => format!(
            "There was an issue reading the archive {archive}: {detail}. \
             Skipping to the next archive; it will be retried on the next run."
        ),
        (_, Some(archive), Some(file), Some(remote)) => format!(
            "There was an error uploading {file} from {archive} ({kind}): {detail}. \
             Please upload it manually to {remote}"
        ),
        (_, Some(archive), Some(file), None) => format!(
            "There was an error uploading {file} from {archive} ({kind}): {detail}. \
             The remote folder could not be determined for this file."
        ),
        (_, Some(archive), None, _) => format!(
            "There was an error uploading a file from {archive} ({kind}): {detail}. \
             The file could not be identified; please check the remote folder for this archive."
        ),
        (_, None, _, _) => format!(
            "There was an error uploading a file ({kind}): {detail}. \
             Please check the remote device for incomplete files."
        ),
    }
}
