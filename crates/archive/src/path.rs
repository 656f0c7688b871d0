use std::fmt;
use std::path::{Component, Path};

use crate::ExtractionError;

/// Relative path of an entry inside an archive, as ordered segments.
///
/// Always non-empty. The last segment is the file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchivePath {
    segments: Vec<String>,
}

impl ArchivePath {
    /// Parses an archive entry name.
    ///
    /// Backslashes are treated as separators, empty and `.` segments are
    /// dropped. Rejects:
    /// - Empty names
    /// - Absolute names (`/x`, `C:\x`)
    /// - Parent directory traversal (`..`)
    pub fn parse(entry_name: &str) -> Result<Self, ExtractionError> {
        let normalized = entry_name.replace('\\', "/");

        if normalized.starts_with('/') {
            return Err(ExtractionError::InvalidEntryPath(format!(
                "absolute path not allowed: {entry_name}"
            )));
        }

        let mut segments = Vec::new();
        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        ExtractionError::InvalidEntryPath(format!(
                            "non UTF-8 segment: {entry_name}"
                        ))
                    })?;
                    if is_drive_letter(part) && segments.is_empty() {
                        return Err(ExtractionError::InvalidEntryPath(format!(
                            "path prefix not allowed: {entry_name}"
                        )));
                    }
                    segments.push(part.to_string());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(ExtractionError::InvalidEntryPath(format!(
                        "parent directory traversal not allowed: {entry_name}"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ExtractionError::InvalidEntryPath(format!(
                        "absolute path not allowed: {entry_name}"
                    )));
                }
            }
        }

        if segments.is_empty() {
            return Err(ExtractionError::InvalidEntryPath(format!(
                "empty path: {entry_name:?}"
            )));
        }

        Ok(Self { segments })
    }

    /// All segments, file name last.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Directory segments (everything but the file name).
    pub fn parents(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The last segment.
    pub fn file_name(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// First directory segment, if the entry is not at the archive root.
    pub fn top_level_dir(&self) -> Option<&str> {
        self.parents().first().map(String::as_str)
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn is_drive_letter(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
