//! In-memory archive extraction.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::debug;

use crate::ExtractionError;
use crate::path::ArchivePath;

/// Upper bound on buffer pre-allocation from a size declared in the archive.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// One decompressed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: ArchivePath,
    pub data: Vec<u8>,
}

impl ExtractedFile {
    pub fn new(path: ArchivePath, data: Vec<u8>) -> Self {
        Self { path, data }
    }

    /// Content size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Every file of one archive, held in memory at once.
#[derive(Debug, Default)]
pub struct ExtractedArchive {
    files: Vec<ExtractedFile>,
    total_bytes: u64,
}

impl ExtractedArchive {
    /// Builds an archive from `(path, content)` pairs.
    ///
    /// Paths are unique: a later entry with the same path replaces the
    /// earlier one. Files are ordered by path.
    pub fn from_entries(entries: impl IntoIterator<Item = (ArchivePath, Vec<u8>)>) -> Self {
        let map: BTreeMap<ArchivePath, Vec<u8>> = entries.into_iter().collect();
        let total_bytes = map.values().map(|d| d.len() as u64).sum();
        let files = map
            .into_iter()
            .map(|(path, data)| ExtractedFile { path, data })
            .collect();
        Self { files, total_bytes }
    }

    pub fn files(&self) -> &[ExtractedFile] {
        &self.files
    }

    /// Hands the files over, transferring ownership of every buffer.
    pub fn into_files(self) -> Vec<ExtractedFile> {
        self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of all content sizes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Decompresses a whole archive into memory.
///
/// Implementations must read the archive once, must not write to disk, and
/// must release the archive handle before returning.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedArchive, ExtractionError>;
}

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    SevenZip,
    Zip,
}

impl ArchiveFormat {
    /// Picks the format from the file name. Anything that is not `.zip` is
    /// treated as 7-Zip.
    pub fn from_path(path: &Path) -> Self {
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if is_zip { Self::Zip } else { Self::SevenZip }
    }
}

/// Production extractor for 7z and zip archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl Extractor for ArchiveExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedArchive, ExtractionError> {
        let format = ArchiveFormat::from_path(path);
        debug!(path = %path.display(), ?format, "reading archive");

        let archive = match format {
            ArchiveFormat::SevenZip => extract_7z(path)?,
            ArchiveFormat::Zip => extract_zip(path)?,
        };

        debug!(
            path = %path.display(),
            files = archive.len(),
            total_bytes = archive.total_bytes(),
            "archive extracted"
        );
        Ok(archive)
    }
}

fn extract_7z(path: &Path) -> Result<ExtractedArchive, ExtractionError> {
    let mut reader = sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty())?;

    let mut entries = Vec::new();
    let mut invalid: Option<ExtractionError> = None;

    reader.for_each_entries(|entry, data| {
        if entry.is_directory() {
            return Ok(true);
        }
        let archive_path = match ArchivePath::parse(entry.name()) {
            Ok(p) => p,
            Err(e) => {
                invalid = Some(e);
                return Ok(false);
            }
        };
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)?;
        entries.push((archive_path, buf));
        Ok(true)
    })?;
    drop(reader);

    match invalid {
        Some(e) => Err(e),
        None => Ok(ExtractedArchive::from_entries(entries)),
    }
}

fn extract_zip(path: &Path) -> Result<ExtractedArchive, ExtractionError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let archive_path = ArchivePath::parse(entry.name())?;
        // The declared size is untrusted header data.
        let declared = entry.size();
        let mut buf = Vec::with_capacity(declared.min(MAX_PREALLOC) as usize);
        entry.read_to_end(&mut buf)?;
        if buf.len() as u64 != declared {
            return Err(ExtractionError::SizeMismatch {
                entry: archive_path.to_string(),
                declared,
                actual: buf.len() as u64,
            });
        }
        entries.push((archive_path, buf));
    }

    Ok(ExtractedArchive::from_entries(entries))
}
