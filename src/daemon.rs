//! Multi-entry orchestrator.
//!
//! Loads and validates the configuration, builds one [`CloneManager`] per
//! entry, and drives sync ticks. A failing entry is logged and skipped so
//! the remaining entries still get their tick; the next tick retries it
//! from its kept baseline.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::config::CloneConfig;
use crate::error::{codes, ConfigError};
use crate::sync::manager::CloneManager;

#[derive(Debug)]
pub struct CloneDaemon {
    managers: Vec<CloneManager>,
    interval: Duration,
}

impl CloneDaemon {
    /// Loads the configuration file and builds a manager per entry.
    pub fn new(config_path: &Path) -> Result<Self, ConfigError> {
        let mut config = CloneConfig::load(config_path)?;
        config.sanitize()?;
        config.validate(config_path)?;
        info!(
            target: "config",
            path = %config_path.display(),
            entries = config.entries.len(),
            "configuration validated"
        );
        Ok(Self::from_config(config))
    }

    /// Builds a daemon from an already sanitized and validated config.
    pub fn from_config(config: CloneConfig) -> Self {
        let interval = Duration::from_secs(config.sync_interval_secs);
        let managers = config.entries.into_iter().map(CloneManager::new).collect();
        Self { managers, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs a single tick over every managed entry.
    pub fn run_once(&mut self) {
        for manager in &mut self.managers {
            let source = manager.entry().source_directory.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| manager.sync())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(
                        target: "daemon",
                        code = err.code(),
                        source = %source.display(),
                        "{err}"
                    );
                }
                Err(_) => {
                    error!(
                        target: "daemon",
                        code = codes::UNKNOWN_FATAL,
                        source = %source.display(),
                        "sync tick aborted by an unexpected fatal error"
                    );
                }
            }
        }
    }

    /// Ticks forever at the configured interval.
    pub fn run(&mut self) {
        info!(
            target: "daemon",
            interval_secs = self.interval.as_secs(),
            entries = self.managers.len(),
            "entering sync loop"
        );
        loop {
            self.run_once();
            thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloneEntry, CloneMode};
    use std::fs;
    use tempfile::TempDir;

    fn config_for(entries: Vec<CloneEntry>) -> CloneConfig {
        CloneConfig {
            entries,
            sync_interval_secs: 1,
        }
    }

    #[test]
    fn test_run_once_syncs_all_entries() {
        let source_a = TempDir::new().unwrap();
        let source_b = TempDir::new().unwrap();
        let mirror_a = TempDir::new().unwrap();
        let mirror_b = TempDir::new().unwrap();
        fs::write(source_a.path().join("a.txt"), "a").unwrap();
        fs::write(source_b.path().join("b.txt"), "b").unwrap();

        let mut daemon = CloneDaemon::from_config(config_for(vec![
            CloneEntry::new(
                source_a.path().to_path_buf(),
                mirror_a.path().to_path_buf(),
                CloneMode::Copy,
            ),
            CloneEntry::new(
                source_b.path().to_path_buf(),
                mirror_b.path().to_path_buf(),
                CloneMode::Copy,
            ),
        ]));
        daemon.run_once();

        assert!(mirror_a.path().join("a.txt").exists());
        assert!(mirror_b.path().join("b.txt").exists());
    }

    #[test]
    fn test_failing_entry_does_not_block_others() {
        let parent = TempDir::new().unwrap();
        let missing_source = parent.path().join("missing");
        let healthy_source = TempDir::new().unwrap();
        let mirror_a = TempDir::new().unwrap();
        let mirror_b = TempDir::new().unwrap();
        fs::write(healthy_source.path().join("ok.txt"), "ok").unwrap();

        let mut daemon = CloneDaemon::from_config(config_for(vec![
            CloneEntry::new(
                missing_source,
                mirror_a.path().to_path_buf(),
                CloneMode::Copy,
            ),
            CloneEntry::new(
                healthy_source.path().to_path_buf(),
                mirror_b.path().to_path_buf(),
                CloneMode::Copy,
            ),
        ]));
        daemon.run_once();

        assert!(mirror_b.path().join("ok.txt").exists());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "entries = []\n").unwrap();

        let err = CloneDaemon::new(&path).unwrap_err();
        assert_eq!(err.code(), "config_error.no_entries_defined");
    }
}
