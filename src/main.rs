use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::EnvFilter;

use snapclone::error::codes;
use snapclone::CloneDaemon;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = codes::UNHANDLED_EXCEPTION, "{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(default_config_path)
        .context("no config file given and no user config directory available")?;

    let mut daemon = CloneDaemon::new(&config_path)
        .with_context(|| format!("failed to start from '{}'", config_path.display()))?;

    daemon.run();
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("snapclone").join("config.toml"))
}
