//! Error taxonomy for the clone engine.
//!
//! Errors are grouped the same way they surface to operators: configuration,
//! filesystem, command, transaction. Every variant carries a stable string
//! identifier (see [`code`](ConfigError::code) on each enum) that log
//! consumers can match on without parsing display text.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Identifiers that are only ever emitted through the log stream, never
/// carried by an error value.
pub mod codes {
    pub const UNRECOVERED_ENTRIES: &str = "transaction_error.unrecovered_entries";
    pub const UNRECOVERED_FILE: &str = "transaction_error.unrecovered_file";
    pub const UNRECOVERED_DIRECTORY: &str = "transaction_error.unrecovered_directory";
    pub const UNHANDLED_EXCEPTION: &str = "system_error.unhandled_exception";
    pub const UNKNOWN_FATAL: &str = "system_error.unknown_fatal";
}

/// Failures while loading, sanitizing, or validating the clone configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot open config file '{path}'")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config file '{path}': {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("unsupported config format '{path}' (expected .toml or .json)")]
    UnsupportedFormat { path: PathBuf },

    #[error("'{field}' must be an absolute path")]
    PathNotAbsolute { field: &'static str },

    #[error("exclude_patterns and include_patterns are mutually exclusive")]
    ConflictingPatterns,

    #[error("invalid pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("overlapping path detected in '{field}': {path}")]
    OverlappingPathConflict { field: &'static str, path: PathBuf },

    #[error("no entries defined in config file '{path}'")]
    NoEntriesDefined { path: PathBuf },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound { .. } => "config_error.file_not_found",
            Self::ParseError { .. } => "config_error.parse_error",
            Self::UnsupportedFormat { .. } => "config_error.unsupported_format",
            Self::PathNotAbsolute { .. } => "config_error.path_not_absolute",
            Self::ConflictingPatterns => "config_error.conflicting_patterns",
            Self::InvalidPattern { .. } => "config_error.invalid_pattern",
            Self::OverlappingPathConflict { .. } => "config_error.overlapping_path_conflict",
            Self::NoEntriesDefined { .. } => "config_error.no_entries_defined",
        }
    }
}

/// Failures raised while observing the filesystem, before any mutation.
#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("failed to traverse directory '{root}'")]
    FailedToTraverseDirectory {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("could not determine available space on '{path}'")]
    AvailableSpaceFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("insufficient space on '{path}': {required} bytes required, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },
}

impl FilesystemError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FailedToTraverseDirectory { .. } => "filesystem_error.failed_to_traverse_directory",
            Self::AvailableSpaceFailed { .. } => "filesystem_error.available_space_failed",
            Self::InsufficientSpace { .. } => "filesystem_error.insufficient_space",
        }
    }
}

/// A filesystem mutation that failed inside a command, with the paths the
/// operation was working on when it gave up.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("copy command {stage}: '{from}' -> '{to}' failed")]
    CopyFailed {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("rename command {stage}: '{from}' -> '{to}' failed")]
    RenameFailed {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("remove command {stage}: '{path}' failed")]
    RemoveFailed {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("remove command cleanup: '{path}' could not be cleared")]
    RemoveCleanupFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CopyFailed { .. } => "command_error.copy_failed",
            Self::RenameFailed { .. } => "command_error.rename_failed",
            Self::RemoveFailed { .. } => "command_error.remove_failed",
            Self::RemoveCleanupFailed { .. } => "command_error.remove_cleanup_failed",
        }
    }
}

/// Outcome of a failed transaction run.
///
/// `StartFailed` means every executed command was undone and the destination
/// is back in its pre-transaction state. `RollbackFailed` means at least one
/// undo did not converge; the unrecovered paths have been logged and the
/// destination must be inspected manually.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction failed and was rolled back")]
    StartFailed {
        #[source]
        source: CommandError,
    },

    #[error("transaction rollback failed - destination may be inconsistent")]
    RollbackFailed {
        #[source]
        source: CommandError,
    },
}

impl TransactionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StartFailed { .. } => "transaction_error.start_failed",
            Self::RollbackFailed { .. } => "transaction_error.rollback_failed",
        }
    }
}

/// Union of everything a single sync tick can fail with.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Filesystem(err) => err.code(),
            Self::Transaction(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_codes_are_stable() {
        assert_eq!(
            ConfigError::ConflictingPatterns.code(),
            "config_error.conflicting_patterns"
        );
        assert_eq!(
            ConfigError::PathNotAbsolute { field: "source_directory" }.code(),
            "config_error.path_not_absolute"
        );
        assert_eq!(
            ConfigError::NoEntriesDefined { path: PathBuf::from("/etc/snapclone.toml") }.code(),
            "config_error.no_entries_defined"
        );
    }

    #[test]
    fn command_codes_are_stable() {
        let err = CommandError::CopyFailed {
            stage: "execute",
            from: PathBuf::from("/a"),
            to: PathBuf::from("/b"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(err.code(), "command_error.copy_failed");

        let err = CommandError::RemoveCleanupFailed {
            path: PathBuf::from("/d/.trash"),
            source: io::Error::new(io::ErrorKind::Other, "busy"),
        };
        assert_eq!(err.code(), "command_error.remove_cleanup_failed");
    }

    #[test]
    fn transaction_codes_are_stable() {
        let cause = CommandError::RemoveFailed {
            stage: "execute",
            path: PathBuf::from("/d/x"),
            source: io::Error::new(io::ErrorKind::Other, "busy"),
        };
        let err = TransactionError::StartFailed { source: cause };
        assert_eq!(err.code(), "transaction_error.start_failed");
    }

    #[test]
    fn sync_error_delegates_code() {
        let err = SyncError::Filesystem(FilesystemError::InsufficientSpace {
            path: PathBuf::from("/d"),
            required: 10,
            available: 5,
        });
        assert_eq!(err.code(), "filesystem_error.insufficient_space");
    }
}
