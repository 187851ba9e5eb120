//! Per-entry synchronization driver.
//!
//! A manager owns one configured clone entry together with the last source
//! snapshot that synchronized successfully. Each `sync()` tick walks the
//! source afresh, short-circuits when the snapshot hash is unchanged, and
//! otherwise turns the two diff directions into clone transactions.

use std::path::Path;

use tracing::debug;

use crate::config::{CloneEntry, CloneMode};
use crate::error::{FilesystemError, SyncError};

use super::command::{BehaviorPolicy, CloneCommand, CopyCommand, RemoveCommand, RenameCommand};
use super::path_info::PathStatus;
use super::snapshot::PathSnapshot;
use super::transaction::CloneTransaction;

/// Staging directory updated destination files are renamed into, providing a
/// rollback anchor while their new versions are copied in.
pub const BACKUP_DIR: &str = ".backup";

#[derive(Debug)]
pub struct CloneManager {
    entry: CloneEntry,
    source_snapshot: PathSnapshot,
    destination_snapshot: PathSnapshot,
}

impl CloneManager {
    pub fn new(entry: CloneEntry) -> Self {
        let source_snapshot = PathSnapshot::new(entry.source_directory.clone());
        let destination_snapshot = PathSnapshot::new(entry.destination_directory.clone());
        Self {
            entry,
            source_snapshot,
            destination_snapshot,
        }
    }

    pub fn entry(&self) -> &CloneEntry {
        &self.entry
    }

    /// Runs one synchronization tick.
    ///
    /// On any error the previous source snapshot is kept, so the next tick
    /// sees the same baseline and retries the whole delta.
    pub fn sync(&mut self) -> Result<(), SyncError> {
        let mut current = PathSnapshot::new(self.entry.source_directory.clone());
        current.make(|path| self.entry.filter(path))?;

        if current.hash() == self.source_snapshot.hash() {
            debug!(
                target: "sync",
                source = %self.entry.source_directory.display(),
                "source unchanged; nothing to do"
            );
            return Ok(());
        }

        let updates = current.local_diff(&self.source_snapshot);
        self.copy(&updates)?;

        match self.entry.mode {
            CloneMode::Copy => {
                let removals = self.source_snapshot.local_diff(&current);
                self.remove(&removals)?;
                self.source_snapshot = current;
            }
            CloneMode::Move => {
                self.drain_source(&updates)?;
                // The drain changed the source underneath `current`; rebuild
                // the baseline from what is actually left.
                let mut drained = PathSnapshot::new(self.entry.source_directory.clone());
                drained.make(|path| self.entry.filter(path))?;
                self.source_snapshot = drained;
            }
        }

        Ok(())
    }

    /// Applies added and updated entries to the destination.
    ///
    /// Four commands, in order: copy added entries; rename the destination's
    /// current versions of updated files aside into `.backup`; copy the new
    /// versions in; discard the backup. A failure in the third step rolls
    /// back through the rename, restoring the originals.
    fn copy(&self, diff: &PathSnapshot) -> Result<(), SyncError> {
        let mut added = PathSnapshot::new(diff.root().to_path_buf());
        added.add_files(diff.files(), |_, info| {
            matches!(
                info.path_status,
                PathStatus::Added | PathStatus::StructurallyRequired
            )
        });
        added.add_directories(diff.directories(), |_, info| {
            matches!(
                info.path_status,
                PathStatus::Added | PathStatus::StructurallyRequired
            )
        });

        let mut updated = PathSnapshot::new(diff.root().to_path_buf());
        updated.add_files(diff.files(), |_, info| {
            info.path_status == PathStatus::Updated
        });
        updated.add_directories(diff.directories(), |_, info| {
            matches!(
                info.path_status,
                PathStatus::Updated | PathStatus::StructurallyRequired
            )
        });

        if !added.has_data() && !updated.has_data() {
            return Ok(());
        }

        self.check_disk_space(&added, &updated)?;

        let destination_root = self.destination_snapshot.root().to_path_buf();
        let backup_root = destination_root.join(BACKUP_DIR);
        let renamed = updated.rebased(&destination_root);
        let backup_selection = renamed.rebased(&backup_root);

        let mut transaction = CloneTransaction::new();
        transaction.add(CloneCommand::Copy(CopyCommand::new(
            added,
            destination_root.clone(),
            BehaviorPolicy::default(),
        )));
        transaction.add(CloneCommand::Rename(RenameCommand::new(
            renamed,
            backup_root,
        )));
        transaction.add(CloneCommand::Copy(CopyCommand::new(
            updated,
            destination_root,
            BehaviorPolicy::default(),
        )));
        transaction.add(CloneCommand::Remove(RemoveCommand::discarding_root(
            backup_selection,
        )));

        transaction.start()?;
        Ok(())
    }

    /// Mirrors deletions: removes entries that disappeared from the source
    /// (plus the directory scaffolding their trash staging needs) from the
    /// destination.
    fn remove(&self, diff: &PathSnapshot) -> Result<(), SyncError> {
        let mut removals = PathSnapshot::new(diff.root().to_path_buf());
        removals.add_files(diff.files(), |_, info| {
            matches!(
                info.path_status,
                PathStatus::Deleted | PathStatus::StructurallyRequired
            )
        });
        removals.add_directories(diff.directories(), |_, info| {
            matches!(
                info.path_status,
                PathStatus::Deleted | PathStatus::StructurallyRequired
            )
        });

        if !removals.has_data() {
            return Ok(());
        }

        removals.rebase(self.destination_snapshot.root().to_path_buf());

        let mut transaction = CloneTransaction::new();
        transaction.add(CloneCommand::Remove(RemoveCommand::new(removals)));
        transaction.start()?;
        Ok(())
    }

    /// Move mode: after the copy committed, the transferred entries are
    /// removed from the source. Directories that still hold unsynced
    /// (filtered-out) content survive, since only empty directories are
    /// removed.
    fn drain_source(&self, diff: &PathSnapshot) -> Result<(), SyncError> {
        let mut moved = PathSnapshot::new(diff.root().to_path_buf());
        moved.add_files(diff.files(), |_, info| {
            matches!(info.path_status, PathStatus::Added | PathStatus::Updated)
        });
        moved.add_directories(diff.directories(), |_, info| {
            matches!(
                info.path_status,
                PathStatus::Added | PathStatus::Updated | PathStatus::StructurallyRequired
            )
        });

        if !moved.has_data() {
            return Ok(());
        }

        let mut transaction = CloneTransaction::new();
        transaction.add(CloneCommand::Remove(RemoveCommand::new(moved)));
        transaction.start()?;
        Ok(())
    }

    /// Refuses to start a copy whose file bytes cannot fit on the
    /// destination filesystem.
    fn check_disk_space(
        &self,
        added: &PathSnapshot,
        updated: &PathSnapshot,
    ) -> Result<(), FilesystemError> {
        let required: u64 = added
            .files()
            .values()
            .chain(updated.files().values())
            .map(|info| info.file_size)
            .sum();
        if required == 0 {
            return Ok(());
        }

        // The destination may not exist before the first sync; probe the
        // nearest existing ancestor.
        let destination_root = self.destination_snapshot.root();
        let mut probe: &Path = destination_root;
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }

        let available =
            fs2::available_space(probe).map_err(|source| FilesystemError::AvailableSpaceFailed {
                path: probe.to_path_buf(),
                source,
            })?;

        if available < required {
            return Err(FilesystemError::InsufficientSpace {
                path: destination_root.to_path_buf(),
                required,
                available,
            });
        }
        Ok(())
    }
}
