//! Archive migration flow: scan, extract, upload, record progress.
//!
//! This crate holds the **orchestration** of a migration run. It owns no
//! FTP or archive code of its own; it drives the extractor, the upload pool
//! and the progress ledger one archive at a time.
//!
//! # Pipeline
//!
//! 1. **Scan**: find archive candidates below the working directory
//! 2. **Skip**: archives already in the ledger are left alone
//! 3. **Extract**: decompress the whole archive into memory
//! 4. **Upload**: one task per file through the bounded pool
//! 5. **Commit**: append the archive to the ledger once every task resolved

pub mod driver;
pub mod error;
pub mod types;

pub use driver::MigrationDriver;
pub use error::PipelineError;
pub use types::{
    DEFAULT_LEDGER_FILE, DEFAULT_REMOTE_ROOT, PipelineConfig, PipelineEvent, RunSummary,
};
