//! Archive discovery.
//!
//! Recursively walks a working directory and collects every file whose name
//! ends with one of the configured archive extensions.

use std::path::{Path, PathBuf};

use tracing::warn;

/// A file that looks like an archive to migrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCandidate {
    /// File name as found on disk. Used as the ledger key.
    pub id: String,
    /// Full local path.
    pub path: PathBuf,
    /// File name with the archive extension removed.
    pub stem: String,
}

/// Archive extensions, matched case-insensitively against the end of a file
/// name. Stored without the leading dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveExtensions {
    /// Longest first, so `iso.7z` wins over `7z`.
    suffixes: Vec<String>,
}

impl Default for ArchiveExtensions {
    fn default() -> Self {
        Self::new(["iso.7z", "7z", "zip"])
    }
}

impl ArchiveExtensions {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut suffixes: Vec<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        suffixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        suffixes.dedup();
        Self { suffixes }
    }

    /// Returns the file name without its archive extension, or `None` if the
    /// name carries none of the extensions.
    pub fn strip<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let lower = file_name.to_ascii_lowercase();
        self.suffixes.iter().find_map(|suffix| {
            let dotted_len = suffix.len() + 1;
            if lower.len() > dotted_len
                && lower.ends_with(suffix.as_str())
                && lower.as_bytes()[lower.len() - dotted_len] == b'.'
            {
                Some(&file_name[..file_name.len() - dotted_len])
            } else {
                None
            }
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.strip(file_name).is_some()
    }
}

/// Scans `root` recursively and returns every archive candidate, sorted by path.
///
/// Fails only if `root` itself cannot be read; unreadable subdirectories are
/// logged and skipped.
pub fn scan_archives(
    root: &Path,
    extensions: &ArchiveExtensions,
) -> Result<Vec<ArchiveCandidate>, std::io::Error> {
    let mut candidates = Vec::new();

    let entries = std::fs::read_dir(root)?;
    walk_entries(entries, extensions, &mut candidates);

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(candidates)
}

fn walk_dir(current: &Path, extensions: &ArchiveExtensions, out: &mut Vec<ArchiveCandidate>) {
    match std::fs::read_dir(current) {
        Ok(entries) => walk_entries(entries, extensions, out),
        Err(e) => warn!(dir = %current.display(), error = %e, "skipping unreadable directory"),
    }
}

fn walk_entries(
    entries: std::fs::ReadDir,
    extensions: &ArchiveExtensions,
    out: &mut Vec<ArchiveCandidate>,
) {
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping entry");
                continue;
            }
        };

        if file_type.is_dir() {
            walk_dir(&path, extensions, out);
        } else if file_type.is_file() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "skipping non UTF-8 file name");
                continue;
            };
            if let Some(stem) = extensions.strip(name) {
                out.push(ArchiveCandidate {
                    id: name.to_string(),
                    stem: stem.to_string(),
                    path: path.clone(),
                });
            }
        }
    }
}
