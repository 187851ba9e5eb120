use std::fs::Metadata;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// How an entry differs from the baseline snapshot it was diffed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Unchanged,
    Added,
    Updated,
    Deleted,
    /// Not changed itself, but an ancestor of a changed entry; carried so
    /// command selections always contain the directory scaffolding they need.
    StructurallyRequired,
}

/// Observation that could not be classified as a clean change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConflict {
    None,
    /// Sizes differ although the timestamps are identical.
    SizeMismatch,
    /// Only the permission bits differ.
    PermissionMismatch,
    /// The walk could not descend into this path.
    AccessDenied,
}

/// Observable metadata of a single filesystem entry.
///
/// Equality is structural on (mtime, size, perms, is_directory); the change
/// status and conflict classification are bookkeeping and do not take part.
#[derive(Debug, Clone)]
pub struct PathInfo {
    pub last_write_time: DateTime<Utc>,
    /// Size in bytes; 0 for directories by convention.
    pub file_size: u64,
    /// POSIX permission bits.
    pub file_perms: u32,
    pub is_directory: bool,
    pub path_status: PathStatus,
    pub conflict: PathConflict,
}

impl PartialEq for PathInfo {
    fn eq(&self, other: &Self) -> bool {
        self.last_write_time == other.last_write_time
            && self.file_size == other.file_size
            && self.file_perms == other.file_perms
            && self.is_directory == other.is_directory
    }
}

impl Eq for PathInfo {}

impl PathInfo {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .map(system_time_to_utc)
            .unwrap_or(DateTime::UNIX_EPOCH);

        Self {
            last_write_time: mtime,
            file_size: if metadata.is_dir() { 0 } else { metadata.len() },
            file_perms: file_mode(metadata),
            is_directory: metadata.is_dir(),
            path_status: PathStatus::Unchanged,
            conflict: PathConflict::None,
        }
    }

    /// Placeholder for a path the walk was not allowed to observe.
    pub fn denied() -> Self {
        Self {
            last_write_time: DateTime::UNIX_EPOCH,
            file_size: 0,
            file_perms: 0,
            is_directory: false,
            path_status: PathStatus::Unchanged,
            conflict: PathConflict::AccessDenied,
        }
    }

    /// Hash over the (mtime, size, perms) triple. Snapshot hashing XOR-folds
    /// these, so the combiner stays order-independent across traversals.
    pub fn entry_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.last_write_time.timestamp().hash(&mut hasher);
        self.last_write_time.timestamp_subsec_nanos().hash(&mut hasher);
        self.file_size.hash(&mut hasher);
        self.file_perms.hash(&mut hasher);
        hasher.finish()
    }
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    let duration = time
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    DateTime::from_timestamp(duration.as_secs() as i64, duration.subsec_nanos())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
