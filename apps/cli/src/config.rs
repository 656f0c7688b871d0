//! Settings management.
//!
//! Settings are stored as TOML:
//! - Linux: `~/.config/ramdeploy/settings.toml`
//! - Windows: `%APPDATA%/ramdeploy/settings.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ramdeploy_archive::ArchiveExtensions;
use ramdeploy_pipeline::{DEFAULT_LEDGER_FILE, DEFAULT_REMOTE_ROOT, PipelineConfig};
use ramdeploy_transfer::{
    ConnectionParams, DEFAULT_BLOCK_SIZE, DEFAULT_FTP_PORT, DEFAULT_WORKERS, PathMapper,
    PoolOptions,
};
use serde::{Deserialize, Serialize};

use crate::cli::Overrides;

/// Migration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// FTP host of the console, optionally with `:port`.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_credential")]
    pub username: String,

    #[serde(default = "default_credential")]
    pub password: String,

    /// Remote games directory.
    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    /// Archive extensions, without the leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Simultaneous FTP sessions.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bytes per STOR block.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Ledger file, relative to the working directory unless absolute.
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,

    /// Leading archive folders dropped from remote paths.
    #[serde(default)]
    pub strip_components: usize,

    /// Remove folders left by older tools that extracted to disk.
    #[serde(default = "default_true")]
    pub clean_stale_extractions: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "192.168.1.80".into()
}

fn default_port() -> u16 {
    DEFAULT_FTP_PORT
}

fn default_credential() -> String {
    "xbox".into()
}

fn default_remote_root() -> String {
    DEFAULT_REMOTE_ROOT.into()
}

fn default_extensions() -> Vec<String> {
    vec!["iso.7z".into(), "7z".into(), "zip".into()]
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_FILE)
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_credential(),
            password: default_credential(),
            remote_root: default_remote_root(),
            extensions: default_extensions(),
            workers: default_workers(),
            block_size: default_block_size(),
            ledger_file: default_ledger_file(),
            strip_components: 0,
            clean_stale_extractions: default_true(),
            connect_timeout_secs: None,
        }
    }
}

impl Settings {
    /// Reads settings from `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read settings {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("invalid settings {}", path.display()))?;
        Ok(settings)
    }

    /// Loads settings, or writes the defaults to `path` if it is missing.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let settings = Self::default();
            settings.save(path)?;
            tracing::info!(path = %path.display(), "default settings written");
            Ok(settings)
        }
    }

    /// Loads settings, falling back to the defaults without touching disk.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves the settings to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Holds the FTP password.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Parses the legacy three-line file: host, username, password.
    ///
    /// Everything else takes its default value.
    pub fn from_legacy_ini(content: &str) -> anyhow::Result<Self> {
        let mut lines = content.lines().map(|l| l.trim_end_matches('\r').trim());
        let mut next = |what: &str| {
            lines
                .next()
                .map(str::to_string)
                .with_context(|| format!("legacy settings file has no {what} line"))
        };

        let host = next("host")?;
        let username = next("username")?;
        let password = next("password")?;
        if host.is_empty() {
            anyhow::bail!("legacy settings file has an empty host");
        }

        Ok(Self {
            host,
            username,
            password,
            ..Self::default()
        })
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, overrides: &Overrides) {
        let Overrides {
            host,
            port,
            username,
            password,
            workers,
            block_size,
            remote_root,
        } = overrides;

        if let Some(v) = host {
            self.host = v.clone();
        }
        if let Some(v) = port {
            self.port = *v;
        }
        if let Some(v) = username {
            self.username = v.clone();
        }
        if let Some(v) = password {
            self.password = v.clone();
        }
        if let Some(v) = workers {
            self.workers = *v;
        }
        if let Some(v) = block_size {
            self.block_size = *v;
        }
        if let Some(v) = remote_root {
            self.remote_root = v.clone();
        }
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            port: self.port,
            ..ConnectionParams::new(&self.host, &self.username, &self.password)
        }
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            workers: self.workers,
            block_size: self.block_size,
            mapper: PathMapper::with_strip_components(self.strip_components),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    /// Pipeline settings for a run over `working_dir`.
    pub fn pipeline_config(&self, working_dir: &Path) -> PipelineConfig {
        PipelineConfig {
            working_dir: working_dir.to_path_buf(),
            ledger_path: working_dir.join(&self.ledger_file),
            remote_root: self.remote_root.clone(),
            extensions: ArchiveExtensions::new(&self.extensions),
            clean_stale_extractions: self.clean_stale_extractions,
        }
    }
}

/// Returns the platform-specific settings file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("ramdeploy")
            .join("settings.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA is not set")?;
        Ok(PathBuf::from(appdata)
            .join("ramdeploy")
            .join("settings.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".ramdeploy").join("settings.toml"))
    }
}
