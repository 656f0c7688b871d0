//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ramdeploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file [default: platform config directory]
    #[arg(long, env = "RAMDEPLOY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload every pending archive found in DIR
    Run {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// List archives in DIR as done or pending, without uploading anything
    Status {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Import host and credentials from a three-line legacy settings file
    ImportLegacy { ini: PathBuf },
}

/// Per-invocation overrides of the settings file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// FTP host, optionally with :port
    #[arg(long, global = true)]
    pub host: Option<String>,

    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[arg(long, global = true)]
    pub username: Option<String>,

    #[arg(long, env = "RAMDEPLOY_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Simultaneous uploads
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Bytes per STOR block
    #[arg(long, global = true)]
    pub block_size: Option<usize>,

    /// Remote games directory
    #[arg(long, global = true)]
    pub remote_root: Option<String>,
}
