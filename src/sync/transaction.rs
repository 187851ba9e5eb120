//! All-or-nothing execution of an ordered command list.
//!
//! Commands run in insertion order; every command that executed is pushed on
//! a stack so a failure can reverse them strictly last-in-first-out. Undo is
//! retried a bounded number of times with a short backoff to ride out
//! transient races (another process briefly holding a handle). When some
//! undo never converges the transaction reports `RollbackFailed` and logs
//! every path still sitting in the failed commands' selections.

use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{codes, CommandError, TransactionError};

use super::command::{CloneCommand, CommandStatus};

/// Undo retries granted to the command whose execute just failed.
const FAILED_COMMAND_UNDO_RETRIES: u32 = 3;
/// Undo retries granted to each command during rollback.
const ROLLBACK_UNDO_RETRIES: u32 = 1;
/// Pause between undo retries.
const UNDO_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct CloneTransaction {
    commands: Vec<CloneCommand>,
    /// Indices into `commands` of everything that executed, in order.
    processed: Vec<usize>,
}

impl CloneTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, command: CloneCommand) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Executes the command list.
    ///
    /// On full success every processed command is finalized (staged trash is
    /// cleared) and the transaction resets. On a command failure the already
    /// executed commands are undone in LIFO order; a clean rollback yields
    /// `transaction_error.start_failed`, a rollback with at least one
    /// non-converging undo yields `transaction_error.rollback_failed` after
    /// logging the unrecovered paths.
    pub fn start(&mut self) -> Result<(), TransactionError> {
        if self.commands.is_empty() {
            return Ok(());
        }

        let mut failure: Option<CommandError> = None;
        for index in 0..self.commands.len() {
            match self.commands[index].execute() {
                Ok(()) => self.processed.push(index),
                Err(err) => {
                    error!(target: "sync", code = err.code(), "{err}");
                    Self::try_undo(&mut self.commands[index], FAILED_COMMAND_UNDO_RETRIES);
                    failure = Some(err);
                    break;
                }
            }
        }

        let Some(cause) = failure else {
            for index in std::mem::take(&mut self.processed) {
                self.commands[index].finalize();
            }
            self.reset();
            return Ok(());
        };

        self.rollback();

        let undo_failed = self
            .commands
            .iter()
            .any(|command| command.undo_status() == CommandStatus::Failure);

        if undo_failed {
            self.log_unrecovered_entries();
            self.reset();
            Err(TransactionError::RollbackFailed { source: cause })
        } else {
            self.reset_command_statuses();
            Err(TransactionError::StartFailed { source: cause })
        }
    }

    /// Pops processed commands and undoes each; keeps going even when an
    /// undo fails so later (earlier-executed) commands still get their turn.
    fn rollback(&mut self) {
        while let Some(index) = self.processed.pop() {
            Self::try_undo(&mut self.commands[index], ROLLBACK_UNDO_RETRIES);
        }
    }

    fn try_undo(command: &mut CloneCommand, max_retries: u32) {
        command.undo();
        let mut attempts: u32 = 0;
        while command.undo_status() == CommandStatus::Failure && attempts < max_retries {
            debug!(target: "sync", attempts, "undo failed; retrying after backoff");
            thread::sleep(UNDO_RETRY_BACKOFF);
            command.undo();
            attempts += 1;
        }
    }

    /// One error line per path still present in the selection of every
    /// command whose undo did not converge.
    fn log_unrecovered_entries(&self) {
        for command in &self.commands {
            if command.undo_status() != CommandStatus::Failure {
                continue;
            }
            let snapshot = command.snapshot();
            error!(
                target: "sync",
                code = codes::UNRECOVERED_ENTRIES,
                root = %snapshot.root().display(),
                "unrecovered entries remain in snapshot"
            );
            for relative in snapshot.files().keys() {
                error!(
                    target: "sync",
                    code = codes::UNRECOVERED_FILE,
                    "unrecovered file: '{}'",
                    snapshot.root().join(relative).display()
                );
            }
            for relative in snapshot.directories().keys() {
                error!(
                    target: "sync",
                    code = codes::UNRECOVERED_DIRECTORY,
                    "unrecovered directory: '{}'",
                    snapshot.root().join(relative).display()
                );
            }
        }
    }

    /// Restores the transaction to a fresh state.
    fn reset(&mut self) {
        self.commands.clear();
        self.processed.clear();
    }

    /// Keeps the command list (the caller may retry `start`) but clears all
    /// execution bookkeeping.
    fn reset_command_statuses(&mut self) {
        for command in &mut self.commands {
            command.reset_statuses();
        }
        self.processed.clear();
    }
}
