//! Pipeline error types.

use std::path::PathBuf;

use ramdeploy_ledger::LedgerError;

/// Errors that abort a whole run.
///
/// Per-archive and per-file problems never surface here; they are reported
/// through [`crate::RunSummary`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("cannot scan working directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
}
