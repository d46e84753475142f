// src/main.rs

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::path::PathBuf;
use tracing::{error, info};

use vanguard_sitecheck::config::ScanConfig;
use vanguard_sitecheck::core::scanner::Scanner;
use vanguard_sitecheck::logging;

/// Audit the HTTPS, TLS, header and DNS hygiene of a website.
#[derive(Parser, Debug)]
#[command(name = "vanguard-sitecheck", version, about)]
struct Cli {
    /// Root domain to scan, e.g. example.com
    domain: String,

    /// TOML file with scanner settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not verify certificates while following redirect chains
    #[arg(long)]
    insecure: bool,

    /// Print the report on a single line
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let log_path = logging::initialize_logging()?;
    info!(log = %log_path.display(), domain = %cli.domain, "Starting vanguard-sitecheck.");

    let mut config = match &cli.config {
        Some(path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    }
    .merge_env()?;
    if cli.insecure {
        config.accept_invalid_certs = true;
    }

    let mut scanner = Scanner::with_config(&cli.domain, config)?;
    let report = scanner.scan().await.inspect_err(|e| {
        error!(code = e.code(), error = %e, "Scan aborted.");
    })?;

    let output = if cli.compact {
        serde_json::to_string(report)
    } else {
        serde_json::to_string_pretty(report)
    }
    .wrap_err("Failed to serialize the report")?;
    println!("{}", output);
    Ok(())
}
