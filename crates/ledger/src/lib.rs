//! Durable progress ledger.
//!
//! One archive identifier per line in a plain text file. The file is read
//! once when the ledger is opened and kept as an in-memory set; commits are
//! appended to both. Lines are never rewritten or removed by this crate:
//! deleting a line by hand is how an operator forces a single archive to be
//! uploaded again.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Errors produced by the ledger. Any of them is fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("cannot create ledger {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot append to ledger {path}: {source}")]
    Append {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid archive identifier: {0:?}")]
    InvalidId(String),
}

/// Set of archive identifiers that were fully transferred.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    done: HashSet<String>,
    /// Entries in file order.
    entries: Vec<String>,
    /// Whether the file currently ends without a trailing newline.
    needs_newline: bool,
}

impl ProgressLedger {
    /// Opens the ledger at `path`, creating an empty file if it is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Create {
                path: path.clone(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| LedgerError::Create {
                path: path.clone(),
                source,
            })?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|source| LedgerError::Read {
                path: path.clone(),
                source,
            })?;

        let (done, entries) = parse_entries(&content);
        let needs_newline = !content.is_empty() && !content.ends_with('\n');

        debug!(path = %path.display(), entries = entries.len(), "ledger opened");

        Ok(Self {
            path,
            done,
            entries,
            needs_newline,
        })
    }

    /// Reads the ledger at `path` without creating it.
    ///
    /// A missing file is an empty ledger. The returned ledger can be queried
    /// but commits will create the file on first use.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        let (done, entries) = parse_entries(&content);
        let needs_newline = !content.is_empty() && !content.ends_with('\n');

        Ok(Self {
            path,
            done,
            entries,
            needs_newline,
        })
    }

    /// Returns `true` if `archive_id` was already committed.
    pub fn is_done(&self, archive_id: &str) -> bool {
        self.done.contains(archive_id)
    }

    /// Records `archive_id` as fully transferred.
    ///
    /// Returns `Ok(false)` without touching the file when the identifier is
    /// already present. The new line is flushed and synced before the
    /// in-memory set is updated.
    pub fn commit(&mut self, archive_id: &str) -> Result<bool, LedgerError> {
        if archive_id.is_empty() || archive_id.contains(['\n', '\r']) {
            return Err(LedgerError::InvalidId(archive_id.to_string()));
        }
        if self.is_done(archive_id) {
            return Ok(false);
        }

        let mut file = self.open_for_append()?;

        let mut line = String::with_capacity(archive_id.len() + 2);
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(archive_id);
        line.push('\n');

        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all())
            .map_err(|source| LedgerError::Append {
                path: self.path.clone(),
                source,
            })?;

        self.needs_newline = false;
        self.done.insert(archive_id.to_string());
        self.entries.push(archive_id.to_string());

        debug!(archive = %archive_id, path = %self.path.display(), "ledger entry committed");
        Ok(true)
    }

    /// Committed identifiers in file order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of committed identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was committed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_append(&mut self) -> Result<File, LedgerError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| LedgerError::Append {
                path: self.path.clone(),
                source,
            })?;

        // The file may have been edited since it was opened.
        let len = file
            .metadata()
            .map_err(|source| LedgerError::Append {
                path: self.path.clone(),
                source,
            })?
            .len();
        self.needs_newline = if len == 0 {
            false
        } else {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))
                .and_then(|_| file.read_exact(&mut last))
                .map_err(|source| LedgerError::Append {
                    path: self.path.clone(),
                    source,
                })?;
            last[0] != b'\n'
        };

        Ok(file)
    }
}

fn parse_entries(content: &str) -> (HashSet<String>, Vec<String>) {
    let mut done = HashSet::new();
    let mut entries = Vec::new();
    for line in content.lines() {
        let id = line.trim_end_matches('\r');
        if id.trim().is_empty() {
            continue;
        }
        if done.insert(id.to_string()) {
            entries.push(id.to_string());
        }
    }
    (done, entries)
}
