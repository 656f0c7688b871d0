//! Mapping of archive-internal paths to remote locations.

use ramdeploy_archive::ArchivePath;

use crate::types::RemoteTarget;

/// Maps an [`ArchivePath`] below a remote root.
///
/// Pure and `Copy`: every worker maps its own file independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathMapper {
    strip_components: usize,
}

impl PathMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops up to `n` leading directory segments before mapping.
    ///
    /// Useful for archives that wrap everything in a folder named after the
    /// game, which the remote root already provides. The file name itself is
    /// never dropped.
    pub fn with_strip_components(n: usize) -> Self {
        Self {
            strip_components: n,
        }
    }

    pub fn strip_components(&self) -> usize {
        self.strip_components
    }

    /// Returns the remote directory and file name for `path`.
    ///
    /// The directory is `remote_root` followed by the directory segments of
    /// `path`, joined with `/`. When there are none it is `remote_root`
    /// unchanged.
    pub fn map(&self, path: &ArchivePath, remote_root: &str) -> RemoteTarget {
        let parents = path.parents();
        let skip = self.strip_components.min(parents.len());
        let dirs = &parents[skip..];

        let directory = if dirs.is_empty() {
            remote_root.to_string()
        } else {
            format!("{}/{}", remote_root.trim_end_matches('/'), dirs.join("/"))
        };

        RemoteTarget {
            directory,
            file_name: path.file_name().to_string(),
        }
    }
}

/// Remote root for one archive: `<games_root>/<stem>/`.
pub fn remote_root_for(games_root: &str, stem: &str) -> String {
    format!("{}/{}/", games_root.trim_end_matches('/'), stem)
}
