//! Undoable filesystem mutations.
//!
//! The three commands form a closed sum: copy a selection into a destination
//! tree, rename a selection aside into a staging root, or remove a selection
//! with a trash-staged safety copy. Each command owns the snapshot selection
//! it acts on and tracks an execute/undo status pair; a transaction drives
//! them and relies on undo never throwing so rollback can keep going.
//!
//! Directory order is load-bearing everywhere here: creation walks the
//! ordered selection ascending (parents first), removal walks it descending
//! (children first).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::CommandError;

use super::snapshot::{PathSnapshot, SnapshotDirectories, SnapshotEntries};

/// Staging directory a remove command copies originals into before deleting.
pub const TRASH_DIR: &str = ".trash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Uninitialized,
    Success,
    Failure,
    PartialSuccess,
}

/// Copy behavior toward already-present destination files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BehaviorPolicy {
    /// Skip files that already exist at the destination.
    #[default]
    None,
    /// Overwrite existing destination files.
    Duplicate,
}

/// A filesystem operation that failed, with the paths it was touching.
#[derive(Debug)]
struct OpFailure {
    from: PathBuf,
    to: PathBuf,
    source: io::Error,
}

impl OpFailure {
    fn at(path: PathBuf, source: io::Error) -> Self {
        Self {
            from: path.clone(),
            to: path,
            source,
        }
    }

    fn copy(self, stage: &'static str) -> CommandError {
        CommandError::CopyFailed {
            stage,
            from: self.from,
            to: self.to,
            source: self.source,
        }
    }

    fn rename(self, stage: &'static str) -> CommandError {
        CommandError::RenameFailed {
            stage,
            from: self.from,
            to: self.to,
            source: self.source,
        }
    }

    fn remove(self, stage: &'static str) -> CommandError {
        CommandError::RemoveFailed {
            stage,
            path: self.from,
            source: self.source,
        }
    }
}

fn log_enter_command(command_name: &str, function_name: &str) {
    debug!(target: "sync", "{command_name}::{function_name} enter");
}

fn log_leave_command(command_name: &str, function_name: &str) {
    debug!(target: "sync", "{command_name}::{function_name} leave");
}

fn create_dir_if_missing(path: &Path) -> Result<(), OpFailure> {
    if !path.exists() {
        info!(target: "sync", path = %path.display(), "creating directory");
        fs::create_dir_all(path).map_err(|source| OpFailure::at(path.to_path_buf(), source))?;
    }
    Ok(())
}

fn remove_dir_if_empty(path: &Path) -> Result<(), OpFailure> {
    if path.exists() {
        let empty = fs::read_dir(path)
            .map_err(|source| OpFailure::at(path.to_path_buf(), source))?
            .next()
            .is_none();
        if empty {
            info!(target: "sync", path = %path.display(), "removing directory");
            fs::remove_dir(path).map_err(|source| OpFailure::at(path.to_path_buf(), source))?;
        }
    }
    Ok(())
}

/// Creates every missing directory of the selection under `root`, parents
/// before children. With `extract_on_success` each created directory is
/// dropped from the selection so a retried pass only revisits the remainder.
fn create_directories(
    directories: &mut SnapshotDirectories,
    root: &Path,
    extract_on_success: bool,
) -> Result<(), OpFailure> {
    let pending: Vec<PathBuf> = directories.keys().cloned().collect();
    for relative in pending {
        let directory_path = root.join(&relative);
        if !directory_path.exists() {
            info!(target: "sync", path = %directory_path.display(), "creating directory");
            fs::create_dir_all(&directory_path)
                .map_err(|source| OpFailure::at(directory_path.clone(), source))?;
            if extract_on_success {
                directories.remove(&relative);
            }
        }
    }
    Ok(())
}

/// Removes the selection's directories under `root`, children before
/// parents. Only directories that still exist and are empty are removed.
fn remove_directories(
    directories: &mut SnapshotDirectories,
    root: &Path,
    extract_on_success: bool,
) -> Result<(), OpFailure> {
    let pending: Vec<PathBuf> = directories.keys().rev().cloned().collect();
    for relative in pending {
        let directory_path = root.join(&relative);
        if directory_path.exists() {
            let empty = fs::read_dir(&directory_path)
                .map_err(|source| OpFailure::at(directory_path.clone(), source))?
                .next()
                .is_none();
            if empty {
                info!(target: "sync", path = %directory_path.display(), "removing directory");
                fs::remove_dir(&directory_path)
                    .map_err(|source| OpFailure::at(directory_path.clone(), source))?;
                if extract_on_success {
                    directories.remove(&relative);
                }
            }
        }
    }
    Ok(())
}

/// Copies each selected file from `source_root` to `destination_root`,
/// skipping files already present unless `overwrite` is set.
fn copy_files(
    files: &mut SnapshotEntries,
    source_root: &Path,
    destination_root: &Path,
    extract_on_success: bool,
    overwrite: bool,
) -> Result<(), OpFailure> {
    let pending: Vec<PathBuf> = files.keys().cloned().collect();
    for relative in pending {
        let to_path = destination_root.join(&relative);
        if overwrite || !to_path.exists() {
            let from_path = source_root.join(&relative);
            info!(
                target: "sync",
                from = %from_path.display(),
                to = %to_path.display(),
                "copying file"
            );
            ensure_parent(&to_path)?;
            fs::copy(&from_path, &to_path).map_err(|source| OpFailure {
                from: from_path,
                to: to_path,
                source,
            })?;
            if extract_on_success {
                files.remove(&relative);
            }
        }
    }
    Ok(())
}

/// Filters can admit a file whose directory was filtered away, leaving the
/// selection without the scaffolding for it; the file operation creates the
/// missing parents itself.
fn ensure_parent(path: &Path) -> Result<(), OpFailure> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| OpFailure::at(parent.to_path_buf(), source))?;
    }
    Ok(())
}

/// Renames each selected file that exists at `source_root` over to
/// `destination_root`. Rename is the unit of atomicity.
fn rename_files(
    files: &mut SnapshotEntries,
    source_root: &Path,
    destination_root: &Path,
    extract_on_success: bool,
) -> Result<(), OpFailure> {
    let pending: Vec<PathBuf> = files.keys().cloned().collect();
    for relative in pending {
        let from_path = source_root.join(&relative);
        if from_path.exists() {
            let to_path = destination_root.join(&relative);
            info!(
                target: "sync",
                from = %from_path.display(),
                to = %to_path.display(),
                "renaming file"
            );
            ensure_parent(&to_path)?;
            fs::rename(&from_path, &to_path).map_err(|source| OpFailure {
                from: from_path,
                to: to_path,
                source,
            })?;
            if extract_on_success {
                files.remove(&relative);
            }
        }
    }
    Ok(())
}

/// Removes each selected file that still exists under `root`.
fn remove_files(
    files: &mut SnapshotEntries,
    root: &Path,
    extract_on_success: bool,
) -> Result<(), OpFailure> {
    let pending: Vec<PathBuf> = files.keys().cloned().collect();
    for relative in pending {
        let entry_path = root.join(&relative);
        if entry_path.exists() {
            info!(target: "sync", path = %entry_path.display(), "removing file");
            fs::remove_file(&entry_path)
                .map_err(|source| OpFailure::at(entry_path.clone(), source))?;
            if extract_on_success {
                files.remove(&relative);
            }
        }
    }
    Ok(())
}

/// Copies a selection into a destination tree: directories first (ascending),
/// then files.
#[derive(Debug, Clone)]
pub struct CopyCommand {
    snapshot: PathSnapshot,
    destination_root: PathBuf,
    policy: BehaviorPolicy,
    execute_status: CommandStatus,
    undo_status: CommandStatus,
}

impl CopyCommand {
    pub fn new(snapshot: PathSnapshot, destination_root: PathBuf, policy: BehaviorPolicy) -> Self {
        Self {
            snapshot,
            destination_root,
            policy,
            execute_status: CommandStatus::Uninitialized,
            undo_status: CommandStatus::Uninitialized,
        }
    }

    pub fn execute(&mut self) -> Result<(), CommandError> {
        if self.execute_status != CommandStatus::Uninitialized
            || self.undo_status == CommandStatus::Failure
        {
            warn!(target: "sync", "copy_command::execute skipped");
            return Ok(());
        }
        log_enter_command("copy_command", "execute");

        match self.execute_body() {
            Ok(()) => {
                self.execute_status = CommandStatus::Success;
                log_leave_command("copy_command", "execute");
                Ok(())
            }
            Err(failure) => {
                self.execute_status = CommandStatus::Failure;
                Err(failure.copy("execute"))
            }
        }
    }

    fn execute_body(&mut self) -> Result<(), OpFailure> {
        let overwrite = self.policy == BehaviorPolicy::Duplicate;
        let source_root = self.snapshot.root().to_path_buf();
        create_directories(self.snapshot.directories_mut(), &self.destination_root, false)?;
        copy_files(
            self.snapshot.files_mut(),
            &source_root,
            &self.destination_root,
            false,
            overwrite,
        )?;
        Ok(())
    }

    pub fn undo(&mut self) {
        if matches!(
            self.execute_status,
            CommandStatus::Uninitialized | CommandStatus::Failure
        ) {
            warn!(target: "sync", "copy_command::undo before execute; nothing to undo");
            return;
        }
        if self.undo_status == CommandStatus::Success {
            debug!(target: "sync", "copy_command::undo skipped; already undone");
            return;
        }
        log_enter_command("copy_command", "undo");

        match self.undo_body() {
            Ok(()) => {
                self.undo_status = CommandStatus::Success;
                log_leave_command("copy_command", "undo");
            }
            Err(failure) => {
                self.undo_status = CommandStatus::Failure;
                let err = failure.copy("undo");
                warn!(target: "sync", code = err.code(), "{err}");
            }
        }
    }

    fn undo_body(&mut self) -> Result<(), OpFailure> {
        remove_files(self.snapshot.files_mut(), &self.destination_root, true)?;
        remove_directories(self.snapshot.directories_mut(), &self.destination_root, true)?;
        Ok(())
    }
}

/// Moves a selection's files aside into a staging root, mirroring the
/// directory tree there first.
#[derive(Debug, Clone)]
pub struct RenameCommand {
    snapshot: PathSnapshot,
    destination_root: PathBuf,
    execute_status: CommandStatus,
    undo_status: CommandStatus,
}

impl RenameCommand {
    pub fn new(snapshot: PathSnapshot, destination_root: PathBuf) -> Self {
        Self {
            snapshot,
            destination_root,
            execute_status: CommandStatus::Uninitialized,
            undo_status: CommandStatus::Uninitialized,
        }
    }

    pub fn execute(&mut self) -> Result<(), CommandError> {
        if self.execute_status != CommandStatus::Uninitialized
            || self.undo_status == CommandStatus::Failure
        {
            warn!(target: "sync", "rename_command::execute skipped");
            return Ok(());
        }
        log_enter_command("rename_command", "execute");

        if !self.snapshot.has_data() {
            log_leave_command("rename_command", "execute");
            return Ok(());
        }

        match self.execute_body() {
            Ok(()) => {
                self.execute_status = CommandStatus::Success;
                log_leave_command("rename_command", "execute");
                Ok(())
            }
            Err(failure) => {
                self.execute_status = CommandStatus::Failure;
                Err(failure.rename("execute"))
            }
        }
    }

    fn execute_body(&mut self) -> Result<(), OpFailure> {
        let source_root = self.snapshot.root().to_path_buf();
        create_dir_if_missing(&self.destination_root)?;
        create_directories(self.snapshot.directories_mut(), &self.destination_root, false)?;
        rename_files(
            self.snapshot.files_mut(),
            &source_root,
            &self.destination_root,
            false,
        )?;
        Ok(())
    }

    pub fn undo(&mut self) {
        if matches!(
            self.execute_status,
            CommandStatus::Uninitialized | CommandStatus::Failure
        ) {
            warn!(target: "sync", "rename_command::undo before execute; nothing to undo");
            return;
        }
        if self.undo_status == CommandStatus::Success {
            debug!(target: "sync", "rename_command::undo skipped; already undone");
            return;
        }
        log_enter_command("rename_command", "undo");

        match self.undo_body() {
            Ok(()) => {
                self.undo_status = CommandStatus::Success;
                log_leave_command("rename_command", "undo");
            }
            Err(failure) => {
                self.undo_status = CommandStatus::Failure;
                let err = failure.rename("undo");
                warn!(target: "sync", code = err.code(), "{err}");
            }
        }
    }

    fn undo_body(&mut self) -> Result<(), OpFailure> {
        let source_root = self.snapshot.root().to_path_buf();
        rename_files(
            self.snapshot.files_mut(),
            &self.destination_root,
            &source_root,
            true,
        )?;
        remove_directories(self.snapshot.directories_mut(), &self.destination_root, true)?;
        remove_dir_if_empty(&self.destination_root)?;
        Ok(())
    }
}

/// Removes a selection from its snapshot root, staging originals under
/// `.trash` first so the removal can be reversed.
///
/// The trash stays in place after a successful execute;
/// [`RemoveCommand::finalize`] tears it down once the surrounding
/// transaction has committed, so rollback can always restore.
#[derive(Debug, Clone)]
pub struct RemoveCommand {
    snapshot: PathSnapshot,
    discard_root: bool,
    execute_status: CommandStatus,
    undo_status: CommandStatus,
}

impl RemoveCommand {
    pub fn new(snapshot: PathSnapshot) -> Self {
        Self {
            snapshot,
            discard_root: false,
            execute_status: CommandStatus::Uninitialized,
            undo_status: CommandStatus::Uninitialized,
        }
    }

    /// Variant for staging directories the command owns outright (the
    /// `.backup` root): finalize also drops the snapshot root once it is
    /// empty. Managed roots must never get this.
    pub fn discarding_root(snapshot: PathSnapshot) -> Self {
        Self {
            discard_root: true,
            ..Self::new(snapshot)
        }
    }

    pub fn execute(&mut self) -> Result<(), CommandError> {
        if self.execute_status != CommandStatus::Uninitialized
            || self.undo_status == CommandStatus::Failure
        {
            warn!(target: "sync", "remove_command::execute skipped");
            return Ok(());
        }
        log_enter_command("remove_command", "execute");

        if !self.snapshot.root().exists() {
            log_leave_command("remove_command", "execute");
            return Ok(());
        }

        match self.execute_body() {
            Ok(()) => {
                self.execute_status = CommandStatus::Success;
                log_leave_command("remove_command", "execute");
                Ok(())
            }
            Err(failure) => {
                self.execute_status = CommandStatus::Failure;
                Err(failure.remove("execute"))
            }
        }
    }

    fn execute_body(&mut self) -> Result<(), OpFailure> {
        let source_root = self.snapshot.root().to_path_buf();
        let trash_path = source_root.join(TRASH_DIR);

        create_dir_if_missing(&trash_path)?;
        create_directories(self.snapshot.directories_mut(), &trash_path, false)?;
        copy_files(
            self.snapshot.files_mut(),
            &source_root,
            &trash_path,
            false,
            true,
        )?;
        remove_files(self.snapshot.files_mut(), &source_root, false)?;
        remove_directories(self.snapshot.directories_mut(), &source_root, false)?;
        Ok(())
    }

    /// Post-commit cleanup: drops the trash and, for a
    /// [`discarding_root`](Self::discarding_root) command whose root is now
    /// empty, the root itself. Failures downgrade the command to
    /// `PartialSuccess` and are logged, never rethrown.
    pub fn finalize(&mut self) {
        if self.execute_status != CommandStatus::Success {
            return;
        }
        let trash_path = self.snapshot.root().join(TRASH_DIR);

        let outcome = (|| -> io::Result<()> {
            if trash_path.exists() {
                info!(target: "sync", path = %trash_path.display(), "removing trash");
                fs::remove_dir_all(&trash_path)?;
            }
            let root = self.snapshot.root();
            if self.discard_root && root.exists() && fs::read_dir(root)?.next().is_none() {
                info!(target: "sync", path = %root.display(), "removing directory");
                fs::remove_dir(root)?;
            }
            Ok(())
        })();

        if let Err(source) = outcome {
            self.execute_status = CommandStatus::PartialSuccess;
            let err = CommandError::RemoveCleanupFailed {
                path: trash_path,
                source,
            };
            warn!(target: "sync", code = err.code(), "{err}");
        }
    }

    pub fn undo(&mut self) {
        if !matches!(
            self.execute_status,
            CommandStatus::Success | CommandStatus::PartialSuccess
        ) {
            warn!(target: "sync", "remove_command::undo before execute; nothing to undo");
            return;
        }
        if self.undo_status == CommandStatus::Success {
            debug!(target: "sync", "remove_command::undo skipped; already undone");
            return;
        }
        log_enter_command("remove_command", "undo");

        let trash_path = self.snapshot.root().join(TRASH_DIR);
        if !trash_path.exists() {
            log_leave_command("remove_command", "undo");
            return;
        }

        match self.undo_body(&trash_path) {
            Ok(()) => {
                match fs::remove_dir_all(&trash_path) {
                    Ok(()) => self.undo_status = CommandStatus::Success,
                    Err(source) => {
                        self.undo_status = CommandStatus::PartialSuccess;
                        let err = CommandError::RemoveCleanupFailed {
                            path: trash_path,
                            source,
                        };
                        warn!(target: "sync", code = err.code(), "{err}");
                    }
                }
                log_leave_command("remove_command", "undo");
            }
            Err(failure) => {
                self.undo_status = CommandStatus::Failure;
                let err = failure.remove("undo");
                warn!(target: "sync", code = err.code(), "{err}");
            }
        }
    }

    fn undo_body(&mut self, trash_path: &Path) -> Result<(), OpFailure> {
        let source_root = self.snapshot.root().to_path_buf();
        create_directories(self.snapshot.directories_mut(), &source_root, true)?;
        copy_files(
            self.snapshot.files_mut(),
            trash_path,
            &source_root,
            true,
            false,
        )?;
        Ok(())
    }
}

/// The closed set of clone commands a transaction can carry.
#[derive(Debug, Clone)]
pub enum CloneCommand {
    Copy(CopyCommand),
    Rename(RenameCommand),
    Remove(RemoveCommand),
}

impl CloneCommand {
    pub fn execute(&mut self) -> Result<(), CommandError> {
        match self {
            Self::Copy(command) => command.execute(),
            Self::Rename(command) => command.execute(),
            Self::Remove(command) => command.execute(),
        }
    }

    pub fn undo(&mut self) {
        match self {
            Self::Copy(command) => command.undo(),
            Self::Rename(command) => command.undo(),
            Self::Remove(command) => command.undo(),
        }
    }

    /// Post-commit cleanup; only the remove command stages state that
    /// outlives execute.
    pub fn finalize(&mut self) {
        if let Self::Remove(command) = self {
            command.finalize();
        }
    }

    pub fn execute_status(&self) -> CommandStatus {
        match self {
            Self::Copy(command) => command.execute_status,
            Self::Rename(command) => command.execute_status,
            Self::Remove(command) => command.execute_status,
        }
    }

    pub fn undo_status(&self) -> CommandStatus {
        match self {
            Self::Copy(command) => command.undo_status,
            Self::Rename(command) => command.undo_status,
            Self::Remove(command) => command.undo_status,
        }
    }

    pub fn snapshot(&self) -> &PathSnapshot {
        match self {
            Self::Copy(command) => &command.snapshot,
            Self::Rename(command) => &command.snapshot,
            Self::Remove(command) => &command.snapshot,
        }
    }

    pub(crate) fn reset_statuses(&mut self) {
        let (execute_status, undo_status) = match self {
            Self::Copy(command) => (&mut command.execute_status, &mut command.undo_status),
            Self::Rename(command) => (&mut command.execute_status, &mut command.undo_status),
            Self::Remove(command) => (&mut command.execute_status, &mut command.undo_status),
        };
        *execute_status = CommandStatus::Uninitialized;
        *undo_status = CommandStatus::Uninitialized;
    }
}
