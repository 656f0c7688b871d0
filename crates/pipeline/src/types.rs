//! Data types for the migration flow.

use std::path::PathBuf;

use ramdeploy_archive::ArchiveExtensions;
use ramdeploy_transfer::FailureReport;

/// Ledger file name used when none is configured.
pub const DEFAULT_LEDGER_FILE: &str = "ramdeploy_progress.txt";

/// Remote directory that receives one folder per archive.
pub const DEFAULT_REMOTE_ROOT: &str = "/F/Games";

/// Settings of one run. Fixed once the driver is built.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory scanned for archives.
    pub working_dir: PathBuf,
    pub ledger_path: PathBuf,
    /// Remote games directory; each archive lands in `<remote_root>/<stem>/`.
    pub remote_root: String,
    pub extensions: ArchiveExtensions,
    /// Remove directories left behind by older, disk-based extractions.
    pub clean_stale_extractions: bool,
}

impl PipelineConfig {
    /// Defaults for `working_dir`, with the ledger stored inside it.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            ledger_path: working_dir.join(DEFAULT_LEDGER_FILE),
            working_dir,
            remote_root: DEFAULT_REMOTE_ROOT.to_string(),
            extensions: ArchiveExtensions::default(),
            clean_stale_extractions: true,
        }
    }
}

/// Progress event emitted during a run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Already in the ledger; nothing was read or sent.
    ArchiveSkipped { archive_id: String },
    ExtractionStarted { archive_id: String },
    /// The archive could not be read. It stays pending.
    ExtractionFailed { archive_id: String, error: String },
    Extracted {
        archive_id: String,
        files: usize,
        bytes: u64,
    },
    FileUploaded {
        archive_id: String,
        file: String,
        remote_path: String,
        bytes: u64,
    },
    FileFailed(FailureReport),
    /// Recorded in the ledger after every task resolved.
    ArchiveCommitted {
        archive_id: String,
        uploaded: usize,
        failed: usize,
    },
    Finished(RunSummary),
}

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub archives_found: usize,
    pub archives_skipped: usize,
    pub archives_committed: usize,
    pub extraction_failures: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub bytes_uploaded: u64,
    /// Set when the run stopped early on request.
    pub cancelled: bool,
    /// Every failure of the run, in the order it happened.
    pub failures: Vec<FailureReport>,
}

impl RunSummary {
    /// True when nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
