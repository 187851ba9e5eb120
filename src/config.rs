//! Clone configuration: the entry list, its validation, and the path filter
//! each entry derives from its patterns.
//!
//! Configuration files are TOML or JSON, selected by extension. Entries are
//! parsed raw, then `sanitize()` normalizes paths and compiles patterns, and
//! `validate()` rejects entry lists whose roots overlap.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneMode {
    /// Mirror the source; deletions propagate.
    Copy,
    /// Transfer entries to the destination and drain them from the source.
    Move,
}

/// One configured source/destination pair.
///
/// `exclude_patterns` and `include_patterns` are raw regex strings as read
/// from the file; `sanitize()` compiles them. The two lists are mutually
/// exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneEntry {
    pub source_directory: PathBuf,
    pub destination_directory: PathBuf,
    pub mode: CloneMode,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(skip)]
    exclude: Vec<Regex>,
    #[serde(skip)]
    include: Vec<Regex>,
}

impl CloneEntry {
    pub fn new(source_directory: PathBuf, destination_directory: PathBuf, mode: CloneMode) -> Self {
        Self {
            source_directory,
            destination_directory,
            mode,
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            exclude: Vec::new(),
            include: Vec::new(),
        }
    }

    pub fn with_patterns(
        source_directory: PathBuf,
        destination_directory: PathBuf,
        mode: CloneMode,
        exclude_patterns: Vec<String>,
        include_patterns: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let mut entry = Self {
            source_directory,
            destination_directory,
            mode,
            exclude_patterns,
            include_patterns,
            exclude: Vec::new(),
            include: Vec::new(),
        };
        entry.sanitize()?;
        Ok(entry)
    }

    /// Normalizes paths, enforces the entry invariants, and compiles the
    /// pattern lists.
    pub fn sanitize(&mut self) -> Result<(), ConfigError> {
        if !self.source_directory.is_absolute() {
            return Err(ConfigError::PathNotAbsolute {
                field: "source_directory",
            });
        }
        if !self.destination_directory.is_absolute() {
            return Err(ConfigError::PathNotAbsolute {
                field: "destination_directory",
            });
        }
        if !self.exclude_patterns.is_empty() && !self.include_patterns.is_empty() {
            return Err(ConfigError::ConflictingPatterns);
        }

        self.source_directory = normalize_path(&self.source_directory);
        self.destination_directory = normalize_path(&self.destination_directory);
        self.exclude = compile_patterns(&self.exclude_patterns)?;
        self.include = compile_patterns(&self.include_patterns)?;
        Ok(())
    }

    /// The walk filter: a path is included when it lives under the source
    /// root and survives the pattern lists. With exclude patterns, none may
    /// match the root-relative path; with include patterns, at least one
    /// must.
    pub fn filter(&self, path: &Path) -> bool {
        if !path.starts_with(&self.source_directory) {
            return false;
        }
        if self.exclude.is_empty() && self.include.is_empty() {
            return true;
        }

        let Ok(relative) = path.strip_prefix(&self.source_directory) else {
            return false;
        };
        let relative = relative.to_string_lossy();

        if !self.exclude.is_empty() {
            return !self.exclude.iter().any(|pattern| pattern.is_match(&relative));
        }
        self.include.iter().any(|pattern| pattern.is_match(&relative))
    }
}

fn compile_patterns(raw_patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    raw_patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// Collapses `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut normalized = if let Some(component @ Component::Prefix(..)) = components.peek().cloned()
    {
        components.next();
        PathBuf::from(component.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

fn default_sync_interval() -> u64 {
    10
}

/// The full configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    pub entries: Vec<CloneEntry>,
    /// Seconds between sync ticks.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

impl CloneConfig {
    /// Reads and parses a configuration file; the format follows the file
    /// extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|err| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
            Some("json") => serde_json::from_str(&raw).map_err(|err| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Sanitizes every entry in place.
    pub fn sanitize(&mut self) -> Result<(), ConfigError> {
        for entry in &mut self.entries {
            entry.sanitize()?;
        }
        Ok(())
    }

    /// Rejects empty entry lists and overlapping roots. Sources must be
    /// pairwise disjoint, destinations must be pairwise disjoint, and no
    /// entry may nest its destination inside its source or vice versa.
    pub fn validate(&self, config_path: &Path) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::NoEntriesDefined {
                path: config_path.to_path_buf(),
            });
        }

        let mut source_roots = PathNode::default();
        let mut destination_roots = PathNode::default();

        for entry in &self.entries {
            if source_roots.insert_conflicts(&entry.source_directory) {
                return Err(ConfigError::OverlappingPathConflict {
                    field: "source_directory",
                    path: entry.source_directory.clone(),
                });
            }
            if destination_roots.insert_conflicts(&entry.destination_directory) {
                return Err(ConfigError::OverlappingPathConflict {
                    field: "destination_directory",
                    path: entry.destination_directory.clone(),
                });
            }
            if entry.destination_directory.starts_with(&entry.source_directory)
                || entry.source_directory.starts_with(&entry.destination_directory)
            {
                return Err(ConfigError::OverlappingPathConflict {
                    field: "destination_directory",
                    path: entry.destination_directory.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Component trie used for overlap detection: inserting a path conflicts
/// when it is an ancestor, descendant, or duplicate of one already present.
#[derive(Default)]
struct PathNode {
    children: HashMap<OsString, PathNode>,
    is_terminal: bool,
}

impl PathNode {
    fn insert_conflicts(&mut self, path: &Path) -> bool {
        let mut current = self;
        for component in path.components() {
            if current.is_terminal {
                return true;
            }
            current = current
                .children
                .entry(component.as_os_str().to_os_string())
                .or_default();
        }
        if current.is_terminal || !current.children.is_empty() {
            return true;
        }
        current.is_terminal = true;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn entry(source: &str, destination: &str) -> CloneEntry {
        CloneEntry::new(
            PathBuf::from(source),
            PathBuf::from(destination),
            CloneMode::Copy,
        )
    }

    #[test]
    fn test_sanitize_rejects_relative_source() {
        let mut bad = entry("relative/source", "/destination");
        let err = bad.sanitize().unwrap_err();
        assert_eq!(err.code(), "config_error.path_not_absolute");
    }

    #[test]
    fn test_sanitize_rejects_conflicting_pattern_lists() {
        let err = CloneEntry::with_patterns(
            PathBuf::from("/source"),
            PathBuf::from("/destination"),
            CloneMode::Copy,
            vec![r"\.tmp$".to_string()],
            vec![r"\.txt$".to_string()],
        )
        .unwrap_err();
        assert_eq!(err.code(), "config_error.conflicting_patterns");
    }

    #[test]
    fn test_sanitize_rejects_invalid_pattern() {
        let err = CloneEntry::with_patterns(
            PathBuf::from("/source"),
            PathBuf::from("/destination"),
            CloneMode::Copy,
            vec!["[unclosed".to_string()],
            Vec::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "config_error.invalid_pattern");
    }

    #[test]
    fn test_sanitize_normalizes_paths() {
        let mut messy = entry("/a/b/../c/./d", "/x/./y");
        messy.sanitize().unwrap();
        assert_eq!(messy.source_directory, PathBuf::from("/a/c/d"));
        assert_eq!(messy.destination_directory, PathBuf::from("/x/y"));
    }

    #[test]
    fn test_filter_requires_descendant() {
        let mut plain = entry("/source", "/destination");
        plain.sanitize().unwrap();

        assert!(plain.filter(Path::new("/source/a.txt")));
        assert!(plain.filter(Path::new("/source/sub/b.txt")));
        assert!(!plain.filter(Path::new("/elsewhere/a.txt")));
    }

    #[test]
    fn test_filter_exclude_patterns() {
        let filtered = CloneEntry::with_patterns(
            PathBuf::from("/source"),
            PathBuf::from("/destination"),
            CloneMode::Copy,
            vec![r"\.log$".to_string(), r"^cache/".to_string()],
            Vec::new(),
        )
        .unwrap();

        assert!(filtered.filter(Path::new("/source/a.txt")));
        assert!(!filtered.filter(Path::new("/source/a.log")));
        assert!(!filtered.filter(Path::new("/source/cache/entry")));
        assert!(filtered.filter(Path::new("/source/sub/cache.txt")));
    }

    #[test]
    fn test_filter_include_patterns() {
        let filtered = CloneEntry::with_patterns(
            PathBuf::from("/source"),
            PathBuf::from("/destination"),
            CloneMode::Copy,
            Vec::new(),
            vec![r"\.txt$".to_string()],
        )
        .unwrap();

        assert!(filtered.filter(Path::new("/source/a.txt")));
        assert!(!filtered.filter(Path::new("/source/a.log")));
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let filtered = CloneEntry::with_patterns(
            PathBuf::from("/source"),
            PathBuf::from("/destination"),
            CloneMode::Copy,
            vec![r"\.tmp$".to_string()],
            Vec::new(),
        )
        .unwrap();

        assert!(!filtered.filter(Path::new("/source/UPPER.TMP")));
    }

    #[test]
    fn test_validate_rejects_empty_entries() {
        let config = CloneConfig {
            entries: Vec::new(),
            sync_interval_secs: 10,
        };
        let err = config.validate(Path::new("/etc/snapclone.toml")).unwrap_err();
        assert_eq!(err.code(), "config_error.no_entries_defined");
    }

    #[test]
    fn test_validate_rejects_overlapping_sources() {
        let config = CloneConfig {
            entries: vec![entry("/data/projects", "/mirror/a"), entry("/data", "/mirror/b")],
            sync_interval_secs: 10,
        };
        let err = config.validate(Path::new("/etc/snapclone.toml")).unwrap_err();
        assert_eq!(err.code(), "config_error.overlapping_path_conflict");
    }

    #[test]
    fn test_validate_rejects_duplicate_destinations() {
        let config = CloneConfig {
            entries: vec![entry("/data/a", "/mirror"), entry("/data/b", "/mirror")],
            sync_interval_secs: 10,
        };
        let err = config.validate(Path::new("/etc/snapclone.toml")).unwrap_err();
        assert_eq!(err.code(), "config_error.overlapping_path_conflict");
    }

    #[test]
    fn test_validate_rejects_destination_inside_source() {
        let config = CloneConfig {
            entries: vec![entry("/data", "/data/mirror")],
            sync_interval_secs: 10,
        };
        let err = config.validate(Path::new("/etc/snapclone.toml")).unwrap_err();
        assert_eq!(err.code(), "config_error.overlapping_path_conflict");
    }

    #[test]
    fn test_validate_accepts_disjoint_entries() {
        let config = CloneConfig {
            entries: vec![entry("/data/a", "/mirror/a"), entry("/data/b", "/mirror/b")],
            sync_interval_secs: 10,
        };
        config.validate(Path::new("/etc/snapclone.toml")).unwrap();
    }

    #[test]
    fn test_load_toml_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
sync_interval_secs = 30

[[entries]]
source_directory = "/data/projects"
destination_directory = "/mirror/projects"
mode = "copy"
exclude_patterns = ["\\.tmp$"]

[[entries]]
source_directory = "/data/inbox"
destination_directory = "/archive/inbox"
mode = "move"
"#,
        )
        .unwrap();

        let mut config = CloneConfig::load(&path).unwrap();
        config.sanitize().unwrap();
        config.validate(&path).unwrap();

        assert_eq!(config.sync_interval_secs, 30);
        assert_eq!(config.entries.len(), 2);
        assert_eq!(config.entries[0].mode, CloneMode::Copy);
        assert_eq!(config.entries[1].mode, CloneMode::Move);
        assert!(!config.entries[0].filter(Path::new("/data/projects/x.tmp")));
    }

    #[test]
    fn test_load_json_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(
            &path,
            r#"{
  "entries": [
    {
      "source_directory": "/data/projects",
      "destination_directory": "/mirror/projects",
      "mode": "copy"
    }
  ]
}"#,
        )
        .unwrap();

        let mut config = CloneConfig::load(&path).unwrap();
        config.sanitize().unwrap();

        assert_eq!(config.sync_interval_secs, 10);
        assert_eq!(config.entries.len(), 1);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "entries: []").unwrap();

        let err = CloneConfig::load(&path).unwrap_err();
        assert_eq!(err.code(), "config_error.unsupported_format");
    }

    #[test]
    fn test_load_missing_file() {
        let err = CloneConfig::load(Path::new("/no/such/config.toml")).unwrap_err();
        assert_eq!(err.code(), "config_error.file_not_found");
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "entries = 42").unwrap();

        let err = CloneConfig::load(&path).unwrap_err();
        assert_eq!(err.code(), "config_error.parse_error");
    }
}
