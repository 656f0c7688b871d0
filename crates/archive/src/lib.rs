//! Archive discovery and in-memory extraction.
//!
//! Archives are located with [`scan_archives`] and decompressed entirely into
//! memory by an [`Extractor`]. Nothing is ever written to local disk: each
//! entry becomes an [`ExtractedFile`] holding its path inside the archive and
//! its content.

mod extract;
mod path;
mod scanner;

pub use extract::{ArchiveExtractor, ArchiveFormat, ExtractedArchive, ExtractedFile, Extractor};
pub use path::ArchivePath;
pub use scanner::{ArchiveCandidate, ArchiveExtensions, scan_archives};

/// Errors produced while reading an archive.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("7z error: {0}")]
    SevenZip(String),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("entry {entry} declares {declared} bytes but holds {actual}")]
    SizeMismatch {
        entry: String,
        declared: u64,
        actual: u64,
    },

    #[error("invalid entry path: {0}")]
    InvalidEntryPath(String),

    #[error("extraction task failed: {0}")]
    Task(String),
}

impl From<sevenz_rust::Error> for ExtractionError {
    fn from(e: sevenz_rust::Error) -> Self {
        Self::SevenZip(e.to_string())
    }
}
