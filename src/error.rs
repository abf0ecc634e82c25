// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Typed errors for the recoverable conditions a problem-directory handle
//! can run into.
//!
//! Programming errors (invalid filenames on a write path, writing through
//! an unlocked handle, double-locking a handle) are not represented here —
//! they `panic!`, matching the original's `error_msg_and_die`: they signal a
//! caller bug, not a condition a caller should be expected to recover from.

use std::path::PathBuf;

/// Errors a [`crate::DirHandle`] operation can return.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The path is a directory but has no `time` item, even after the
    /// lock manager's retry budget was exhausted.
    #[error("'{path}' is not a problem directory")]
    NotAProblemDirectory {
        /// The path that was opened.
        path: PathBuf,
    },

    /// The path (or an item inside it) does not exist.
    #[error("'{path}' does not exist")]
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The path exists but the caller lacks permission to access it.
    #[error("permission denied accessing '{path}'")]
    PermissionDenied {
        /// The path that was denied.
        path: PathBuf,
    },

    /// An item exists but fails a structural check: not a regular file,
    /// hard-linked, or its content doesn't parse as expected (e.g. `time`).
    #[error("'{name}' is corrupted: {reason}")]
    CorruptItem {
        /// The item's filename.
        name: String,
        /// Human-readable reason the item was rejected.
        reason: String,
    },

    /// The lock manager could not acquire the lock (used only in contexts
    /// where contention is surfaced rather than silently retried forever).
    #[error("could not acquire lock on '{path}'")]
    LockUnavailable {
        /// The directory whose lock was contended.
        path: PathBuf,
    },

    /// Directory deletion did not converge within its retry budget.
    #[error("could not remove directory '{path}' after repeated attempts")]
    DeleteDidNotConverge {
        /// The directory that could not be removed.
        path: PathBuf,
    },

    /// A `nix`-level syscall failure not covered by a more specific variant.
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),

    /// A `std::io` failure not covered by a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
