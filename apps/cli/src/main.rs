//! ramdeploy entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::Settings;

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = execute(cli) {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let config_path = match &cli.config {
        Some(p) => p.clone(),
        None => config::config_path()?,
    };

    match cli.command {
        Commands::Run { dir } => {
            let mut settings = Settings::load_or_create(&config_path)?;
            settings.apply(&cli.overrides);
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                host = %settings.host,
                remote_root = %settings.remote_root,
                workers = settings.workers,
                "starting migration"
            );

            let rt = tokio::runtime::Runtime::new()?;
            let summary = rt.block_on(app::run(&settings, &dir))?;
            app::print_summary(&summary);
        }
        Commands::Status { dir } => {
            let mut settings = Settings::load_or_default(&config_path)?;
            settings.apply(&cli.overrides);
            app::status(&settings, &dir)?;
        }
        Commands::ImportLegacy { ini } => {
            let content = std::fs::read_to_string(&ini)?;
            let legacy = Settings::from_legacy_ini(&content)?;
            let mut settings = Settings::load_or_default(&config_path)?;
            settings.host = legacy.host;
            settings.username = legacy.username;
            settings.password = legacy.password;
            settings.save(&config_path)?;
            println!(
                "Imported {} into {} (host {}, user {})",
                ini.display(),
                config_path.display(),
                settings.host,
                settings.username
            );
        }
    }

    Ok(())
}
