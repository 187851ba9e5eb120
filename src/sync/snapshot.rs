//! Point-in-time description of a directory subtree.
//!
//! A snapshot maps root-relative paths to [`PathInfo`] and carries a cached,
//! order-independent hash so two walks of an unchanged tree compare equal no
//! matter how the filesystem enumerated them. Diffing two snapshots yields a
//! third snapshot whose entries are classified (Added/Updated/Deleted plus
//! structurally required ancestors); command selections are carved out of
//! that diff with [`add_files`](PathSnapshot::add_files) and
//! [`add_directories`](PathSnapshot::add_directories).

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::FilesystemError;

use super::path_info::{PathConflict, PathInfo, PathStatus};

pub type SnapshotEntries = HashMap<PathBuf, PathInfo>;
/// Ordered by path so ascending iteration visits parents before children and
/// descending iteration visits children before parents.
pub type SnapshotDirectories = BTreeMap<PathBuf, PathInfo>;

#[derive(Debug, Clone)]
pub struct PathSnapshot {
    root: PathBuf,
    entries: SnapshotEntries,
    files: SnapshotEntries,
    directories: SnapshotDirectories,
    conflicts: SnapshotEntries,
    creation_time: DateTime<Utc>,
    hash: u64,
}

impl PathSnapshot {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            entries: SnapshotEntries::new(),
            files: SnapshotEntries::new(),
            directories: SnapshotDirectories::new(),
            conflicts: SnapshotEntries::new(),
            creation_time: Utc::now(),
            hash: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn entries(&self) -> &SnapshotEntries {
        &self.entries
    }

    pub fn files(&self) -> &SnapshotEntries {
        &self.files
    }

    pub fn directories(&self) -> &SnapshotDirectories {
        &self.directories
    }

    pub fn conflicts(&self) -> &SnapshotEntries {
        &self.conflicts
    }

    pub(crate) fn files_mut(&mut self) -> &mut SnapshotEntries {
        &mut self.files
    }

    pub(crate) fn directories_mut(&mut self) -> &mut SnapshotDirectories {
        &mut self.directories
    }

    pub fn has_data(&self) -> bool {
        !self.files.is_empty() || !self.directories.is_empty()
    }

    /// Populates the snapshot by recursively walking the root.
    ///
    /// `filter` is applied to every absolute path; entries it rejects are
    /// dropped. A permission-denied walk error is recorded as an
    /// [`PathConflict::AccessDenied`] conflict and the walk continues; any
    /// other walk error aborts with
    /// `filesystem_error.failed_to_traverse_directory`.
    pub fn make<F>(&mut self, filter: F) -> Result<(), FilesystemError>
    where
        F: Fn(&Path) -> bool,
    {
        self.entries.clear();
        self.files.clear();
        self.directories.clear();
        self.conflicts.clear();

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.record_walk_error(err, &filter)?;
                    continue;
                }
            };

            let path = entry.path();
            if path == self.root.as_path() {
                continue;
            }
            if !filter(path) {
                continue;
            }
            // Symlinks are not mirrored.
            if entry.path_is_symlink() {
                debug!(target: "sync", path = %path.display(), "skipping symlink");
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative.to_path_buf();

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    let path = path.to_path_buf();
                    self.record_walk_error_at(path, err, &filter)?;
                    continue;
                }
            };

            let info = PathInfo::from_metadata(&metadata);
            if info.is_directory {
                self.directories.insert(relative.clone(), info.clone());
            } else {
                self.files.insert(relative.clone(), info.clone());
            }
            self.entries.insert(relative, info);
        }

        self.hash = self.compute_hash();
        Ok(())
    }

    fn record_walk_error<F>(&mut self, err: walkdir::Error, filter: &F) -> Result<(), FilesystemError>
    where
        F: Fn(&Path) -> bool,
    {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        self.record_walk_error_at(path, err, filter)
    }

    fn record_walk_error_at<F>(
        &mut self,
        path: PathBuf,
        err: walkdir::Error,
        filter: &F,
    ) -> Result<(), FilesystemError>
    where
        F: Fn(&Path) -> bool,
    {
        let denied = err
            .io_error()
            .map(|io_err| io_err.kind() == io::ErrorKind::PermissionDenied)
            .unwrap_or(false);

        if denied {
            if filter(&path) {
                let relative = path
                    .strip_prefix(&self.root)
                    .map(Path::to_path_buf)
                    .unwrap_or(path.clone());
                debug!(target: "sync", path = %path.display(), "access denied during walk");
                self.conflicts.insert(relative, PathInfo::denied());
            }
            return Ok(());
        }

        Err(FilesystemError::FailedToTraverseDirectory {
            root: self.root.clone(),
            source: err,
        })
    }

    fn compute_hash(&self) -> u64 {
        self.entries
            .values()
            .fold(0u64, |seed, info| seed ^ info.entry_hash())
    }

    /// Classifies how `self` differs from `other`.
    ///
    /// The result is rooted at `self.root`. Keys missing from `other` are
    /// Added when `self` is the newer snapshot and Deleted otherwise; keys
    /// present in both with a differing (mtime, size, perms) triple are
    /// Updated, emitted only from the newer snapshot's side. Directories
    /// whose only changes underneath are deletions are pruned back to
    /// Unchanged, and ancestors of every emitted entry are filled in as
    /// StructurallyRequired.
    pub fn local_diff(&self, other: &PathSnapshot) -> PathSnapshot {
        let mut result = PathSnapshot::new(self.root.clone());
        let self_is_newer = self.creation_time >= other.creation_time;

        for (relative, info) in &self.entries {
            match other.entries.get(relative) {
                None => {
                    if other.is_under_denied(relative) {
                        let mut uncertain = info.clone();
                        uncertain.conflict = PathConflict::AccessDenied;
                        result.conflicts.insert(relative.clone(), uncertain);
                        continue;
                    }
                    let status = if self_is_newer {
                        PathStatus::Added
                    } else {
                        PathStatus::Deleted
                    };
                    result.insert_classified(relative.clone(), info.clone(), status);
                }
                Some(previous) => {
                    if info == previous || !self_is_newer {
                        continue;
                    }
                    let mut changed = info.clone();
                    if info.last_write_time == previous.last_write_time
                        && info.file_size != previous.file_size
                    {
                        changed.conflict = PathConflict::SizeMismatch;
                        result.conflicts.insert(relative.clone(), changed.clone());
                    } else if info.last_write_time == previous.last_write_time
                        && info.file_perms != previous.file_perms
                    {
                        changed.conflict = PathConflict::PermissionMismatch;
                        result.conflicts.insert(relative.clone(), changed.clone());
                    }
                    result.insert_classified(relative.clone(), changed, PathStatus::Updated);
                }
            }
        }

        result.prune_structural_directories();
        result.add_required_ancestors(self);
        result.hash = result.compute_hash();
        result
    }

    fn insert_classified(&mut self, relative: PathBuf, mut info: PathInfo, status: PathStatus) {
        info.path_status = status;
        if info.is_directory {
            self.directories.insert(relative.clone(), info.clone());
        } else {
            self.files.insert(relative.clone(), info.clone());
        }
        self.entries.insert(relative, info);
    }

    fn is_under_denied(&self, relative: &Path) -> bool {
        self.conflicts.iter().any(|(denied, info)| {
            info.conflict == PathConflict::AccessDenied && relative.starts_with(denied)
        })
    }

    /// Downgrades Updated directories with no emitted non-Deleted descendant.
    /// Deepest first, so a chain of container directories collapses entirely
    /// when the only real changes underneath were deletions.
    fn prune_structural_directories(&mut self) {
        let updated_dirs: Vec<PathBuf> = self
            .directories
            .iter()
            .rev()
            .filter(|(_, info)| info.path_status == PathStatus::Updated)
            .map(|(relative, _)| relative.clone())
            .collect();

        for dir in updated_dirs {
            let keeps = self.entries.iter().any(|(relative, info)| {
                relative != &dir
                    && relative.starts_with(&dir)
                    && info.path_status != PathStatus::Deleted
            });
            if !keeps {
                self.directories.remove(&dir);
                self.entries.remove(&dir);
            }
        }
    }

    /// Inserts ancestors of every emitted entry that are not themselves part
    /// of the diff, marked StructurallyRequired, taking their metadata from
    /// `origin`.
    fn add_required_ancestors(&mut self, origin: &PathSnapshot) {
        let emitted: Vec<PathBuf> = self.entries.keys().cloned().collect();
        for relative in emitted {
            let mut parent = relative.parent();
            while let Some(ancestor) = parent {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                if !self.entries.contains_key(ancestor) {
                    if let Some(info) = origin.entries.get(ancestor) {
                        let mut required = info.clone();
                        required.path_status = PathStatus::StructurallyRequired;
                        self.directories.insert(ancestor.to_path_buf(), required.clone());
                        self.entries.insert(ancestor.to_path_buf(), required);
                    }
                }
                parent = ancestor.parent();
            }
        }
    }

    /// Reinterprets the snapshot as rooted elsewhere. Pure bookkeeping: the
    /// relative keys are untouched and no I/O happens.
    pub fn rebase(&mut self, new_root: PathBuf) {
        self.root = new_root;
    }

    /// Clone-and-rebase convenience for carving staged selections.
    pub fn rebased(&self, new_root: impl Into<PathBuf>) -> PathSnapshot {
        let mut clone = self.clone();
        clone.rebase(new_root.into());
        clone
    }

    /// Filter-copies file entries from another snapshot's map into this one.
    pub fn add_files<F>(&mut self, source: &SnapshotEntries, filter: F)
    where
        F: Fn(&Path, &PathInfo) -> bool,
    {
        for (relative, info) in source {
            if filter(relative, info) {
                self.files.insert(relative.clone(), info.clone());
                self.entries.insert(relative.clone(), info.clone());
            }
        }
    }

    /// Filter-copies directory entries from another snapshot's map into this one.
    pub fn add_directories<F>(&mut self, source: &SnapshotDirectories, filter: F)
    where
        F: Fn(&Path, &PathInfo) -> bool,
    {
        for (relative, info) in source {
            if filter(relative, info) {
                self.directories.insert(relative.clone(), info.clone());
                self.entries.insert(relative.clone(), info.clone());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_conflict(&mut self, relative: PathBuf, info: PathInfo) {
        self.conflicts.insert(relative, info);
    }
}
