/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! `dumpdir` is a concurrency-safe manager for on-disk **problem
//! directories**: small filesystem-backed records a crash-capture
//! pipeline uses to collect metadata and binary artifacts about a single
//! fault event.
//!
//! Many cooperating processes — the crash hook that creates a record,
//! analyzers that augment it, reporters that consume it, and cleanup
//! tools that delete it — touch these directories concurrently on the
//! same host. This crate provides the locking protocol, the
//! create/open/close/delete lifecycle, the item read/write surface, and
//! the `reported_to` log parser that make that safe.
//!
//! The entry point is [`DirHandle`].

/// Read-only accessibility queries that don't require a [`DirHandle`].
pub mod access;
/// Layered retry/backoff timing configuration.
pub mod config;
mod delete;
/// Typed errors for the recoverable conditions this crate's operations
/// can return.
pub mod error;
/// Bit-flag options accepted by the open/create/load family of operations.
pub mod flags;
/// The directory lifecycle handle: create, open, item I/O, close, delete.
pub mod handle;
/// Item read/write and the single-line trailing-newline sanitization pass.
pub mod items;
/// Iteration over a directory's regular-file items and mode/owner
/// sanitization.
pub mod iter;
/// The symlink/PID advisory lock manager.
pub mod lock;
/// Path and filename primitives, including the hardened relative open.
pub mod path;
/// The `reported_to` append-dedup log and its last-match parser.
pub mod reported_to;
/// Parsing and validation of the canonical `time` item.
pub mod time_file;

pub use config::RetryPolicy;
pub use error::{Error, Result};
pub use flags::OpenFlags;
pub use handle::DirHandle;
pub use lock::LockIntent;
pub use reported_to::ReportResult;
