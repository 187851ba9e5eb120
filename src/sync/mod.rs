//! The synchronization pipeline: snapshots, diffing, undoable commands,
//! transactions, and the per-entry manager that composes them.

pub mod command;
pub mod manager;
pub mod path_info;
pub mod snapshot;
pub mod transaction;
