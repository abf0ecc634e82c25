// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Iteration over the regular files inside a problem directory, the
//! root-only mode/owner sanitization pass that runs over them, and the
//! raw entry walk used by the recursive delete.

use crate::error::Result;
use crate::path::secure_open_at;
use nix::dir::{Dir, Type};
use nix::sys::stat::{Mode, fchmod};
use nix::unistd::{Gid, Uid, dup, fchown};
use std::os::fd::{AsFd, AsRawFd};
use tracing::warn;

/// Opens a fresh directory stream over `dir`'s entries, independent of any
/// stream the caller is already iterating (mirrors `dd_init_next_file`
/// duplicating the directory fd so the original stays positioned at `.`).
///
/// # Errors
///
/// Returns [`Error::Nix`] if the fd cannot be duplicated or reopened as a
/// directory stream.
pub fn init_next_file(dir: &impl AsFd) -> Result<Dir> {
    let dup_fd = dup(dir.as_fd().as_raw_fd())?;
    Ok(Dir::from_fd(dup_fd)?)
}

/// Advances `stream`, returning the name of the next regular-file entry
/// (skipping `.`, `..`, and anything not a plain file), or `None` when the
/// stream is exhausted.
///
/// # Errors
///
/// Returns [`Error::Nix`] if reading the stream fails.
pub fn get_next_file(stream: &mut Dir) -> Result<Option<String>> {
    for entry in stream.iter() {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        match entry.file_type() {
            Some(Type::File) | None => return Ok(Some(name)),
            Some(_) => continue,
        }
    }
    Ok(None)
}

/// Advances `stream`, returning the name of the next directory entry of
/// any type (skipping only `.` and `..`), or `None` when the stream is
/// exhausted.
///
/// Unlike [`get_next_file`], this does not filter by file type — callers
/// that need to remove or otherwise visit every entry (subdirectories and
/// symlinks included) use this instead.
///
/// # Errors
///
/// Returns [`Error::Nix`] if reading the stream fails.
pub(crate) fn get_next_entry(stream: &mut Dir) -> Result<Option<String>> {
    for entry in stream.iter() {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        return Ok(Some(name));
    }
    Ok(None)
}

/// Resets the mode and ownership of every item in `dir` to `(uid, gid,
/// mode)`. A no-op unless `owner` is `Some`, matching the original's
/// "only root needs to do this" guard: non-root callers create items with
/// correct ownership via normal umask-based creation already.
///
/// Items that can't be opened for reading are skipped with a warning
/// rather than aborting the whole pass — one unreadable item shouldn't
/// block sanitizing the rest.
///
/// # Errors
///
/// Returns [`Error::Nix`] if the directory stream itself cannot be opened.
pub fn sanitize_mode_and_owner(dir: &impl AsFd, owner: Option<(Uid, Gid)>, mode: Mode) -> Result<()> {
    let Some((uid, gid)) = owner else {
        return Ok(());
    };

    let mut stream = init_next_file(dir)?;
    while let Some(name) = get_next_file(&mut stream)? {
        let fd = match secure_open_at(dir, &name) {
            Ok(fd) => fd,
            Err(err) => {
                warn!(item = %name, error = %err, "skipping item during ownership sanitization");
                continue;
            }
        };

        if let Err(err) = fchmod(fd.as_fd(), mode) {
            warn!(item = %name, error = %err, "could not change item mode");
        }
        if let Err(err) = fchown(fd.as_fd(), Some(uid), Some(gid)) {
            warn!(item = %name, error = %err, "could not change item ownership");
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::path::open_directory;
    use std::collections::BTreeSet;

    #[test]
    fn iterates_only_regular_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), "1").unwrap();
        std::fs::write(tmp.path().join("b"), "2").unwrap();
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();

        let dir = open_directory(tmp.path()).unwrap();
        let mut stream = init_next_file(&dir).unwrap();
        let mut names = BTreeSet::new();
        while let Some(name) = get_next_file(&mut stream).unwrap() {
            names.insert(name);
        }

        assert_eq!(names, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn get_next_entry_includes_subdirectories_and_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), "1").unwrap();
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();
        std::os::unix::fs::symlink("a", tmp.path().join("link")).unwrap();

        let dir = open_directory(tmp.path()).unwrap();
        let mut stream = init_next_file(&dir).unwrap();
        let mut names = BTreeSet::new();
        while let Some(name) = get_next_entry(&mut stream).unwrap() {
            names.insert(name);
        }

        assert_eq!(
            names,
            BTreeSet::from(["a".to_string(), "subdir".to_string(), "link".to_string()])
        );
    }

    #[test]
    fn sanitize_is_noop_without_owner() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), "1").unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        sanitize_mode_and_owner(&dir, None, Mode::from_bits_truncate(0o600)).unwrap();
    }
}
