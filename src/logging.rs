// src/logging.rs

use color_eyre::eyre::Result;
use directories::ProjectDirs;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use tracing_error::ErrorLayer;
use tracing_subscriber::{self, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

lazy_static! {
    /// Upper-cased crate name, the prefix of every environment variable the tool reads.
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase();
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", *PROJECT_NAME);
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
    /// `<PROJECT>_DATA` moves the log directory, e.g. for CI runs.
    pub static ref DATA_FOLDER: Option<PathBuf> =
        std::env::var(format!("{}_DATA", *PROJECT_NAME)).ok().map(PathBuf::from);
}

/// Where the log file lives: the override, else the platform data directory,
/// else `./.data`.
fn resolve_data_dir(override_dir: Option<&Path>, project: Option<ProjectDirs>) -> PathBuf {
    match (override_dir, project) {
        (Some(dir), _) => dir.to_path_buf(),
        (None, Some(dirs)) => dirs.data_local_dir().to_path_buf(),
        (None, None) => PathBuf::from(".").join(".data"),
    }
}

pub fn data_dir() -> PathBuf {
    resolve_data_dir(
        DATA_FOLDER.as_deref(),
        ProjectDirs::from("com", "vanguard-rs", env!("CARGO_PKG_NAME")),
    )
}

/// `RUST_LOG`, then `<PROJECT>_LOGLEVEL`, then `<crate>=info`.
fn log_level() -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV.as_str()))
        .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")))
}

/// Sends every scan's tracing output to a fresh log file.
///
/// Stdout stays reserved for the JSON report, so nothing is logged there.
/// Returns the log path so the CLI can mention it.
pub fn initialize_logging() -> Result<PathBuf> {
    let directory = data_dir();
    std::fs::create_dir_all(&directory)?;
    let log_path = directory.join(LOG_FILE.as_str());
    let log_file = std::fs::File::create(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_filter(EnvFilter::new(log_level()));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(ErrorLayer::default())
        .init();

    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_crate() {
        assert_eq!(PROJECT_NAME.as_str(), "VANGUARD_SITECHECK");
        assert_eq!(LOG_ENV.as_str(), "VANGUARD_SITECHECK_LOGLEVEL");
        assert_eq!(LOG_FILE.as_str(), "vanguard-sitecheck.log");
    }

    #[test]
    fn override_wins_over_platform_directory() {
        let dirs = ProjectDirs::from("com", "vanguard-rs", "vanguard-sitecheck");
        let chosen = resolve_data_dir(Some(Path::new("/tmp/sitecheck-logs")), dirs);
        assert_eq!(chosen, PathBuf::from("/tmp/sitecheck-logs"));
    }

    #[test]
    fn falls_back_to_local_data_folder() {
        assert_eq!(resolve_data_dir(None, None), PathBuf::from("./.data"));
    }
}
