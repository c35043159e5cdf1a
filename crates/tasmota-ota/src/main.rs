// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Tasmota OTA.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Tasmota OTA - Entry point for the update daemon and its helper commands

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasmota_ota::config::DEFAULT_CONFIG_PATH;
use tasmota_ota::release_checker::ReleaseSource;
use tasmota_ota::{Config, SemanticVersion, daemon, next_target};
use tracing::info;

#[derive(Parser)]
#[command(name = "tasmota-ota")]
#[command(author, version, about = "Firmware update manager for Tasmota devices")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the update daemon
    Run,

    /// Fetch the latest Tasmota release once and print it
    Check,

    /// Show the next upgrade hop for an installed firmware version (offline)
    Plan {
        /// Installed version, e.g. "8.1.0(tasmota)"
        installed: String,

        /// Latest release to plan against
        #[arg(long)]
        latest: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tasmota_ota=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let config = Config::load_or_default(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            info!("Starting Tasmota OTA");
            daemon::run(config).await?;
        }
        Command::Check => {
            let config = Config::load_or_default(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            let source = ReleaseSource::new(&config.release)?;
            let release = source
                .fetch_latest()
                .await
                .with_context(|| format!("fetching {}", source.url()))?;

            println!("Latest release: {} ({})", release.version, release.tag);
            println!("URL: {}", release.release_url);
            if !release.release_summary.is_empty() {
                println!("\n{}", release.release_summary);
            }
        }
        Command::Plan { installed, latest } => {
            let latest = latest
                .as_deref()
                .map(SemanticVersion::parse)
                .transpose()
                .context("invalid --latest version")?;
            let installed_version = SemanticVersion::parse(&installed)
                .with_context(|| format!("invalid installed version '{installed}'"))?;

            let hop = next_target(Some(&installed_version), latest.as_ref());
            let target = hop
                .target
                .as_ref()
                .map_or_else(|| "latest".to_owned(), ToString::to_string);

            if hop.manual_required {
                println!(
                    "{installed_version}: manual upgrade required, flash at least {target} by hand"
                );
            } else {
                let staged = if hop.is_staged(latest.as_ref()) {
                    " (staged)"
                } else {
                    ""
                };
                println!(
                    "{installed_version} -> {target}{staged} via {}",
                    hop.url.unwrap_or("device OtaUrl")
                );
            }
        }
    }

    Ok(())
}
