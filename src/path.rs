// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Path and filename primitives: trailing-slash normalization, the
//! `correct filename` policy, and the hardened relative-open used to read
//! any item file.

use crate::error::{Error, Result};
use nix::dir::Dir;
use nix::fcntl::{OFlag, openat};
use nix::sys::stat::{Mode, SFlag, fstat};
use std::os::fd::{AsFd, OwnedFd};

/// Returns `true` if `component` is `.` or `..`.
#[must_use]
pub fn is_dot_or_dotdot(component: &str) -> bool {
    component == "." || component == ".."
}

/// Validates an item filename: non-empty, no `/`, no embedded NUL, and not
/// `.`/`..`. `.lock` is the only name starting with `.` that is ever valid
/// on disk, but this check is permissive about leading dots in general
/// (item names are not required to start with a letter) — it only rejects
/// the two reserved directory-traversal components and control characters.
#[must_use]
pub fn is_correct_filename(name: &str) -> bool {
    if name.is_empty() || is_dot_or_dotdot(name) {
        return false;
    }
    name.bytes()
        .all(|b| b != b'/' && b != 0 && !b.is_ascii_control())
}

/// Strips trailing `/` characters from a path string.
///
/// Mirrors `rm_trailing_slashes` in the original: a plain string operation,
/// not a canonicalization, so relative paths and paths to not-yet-existing
/// directories pass through unchanged apart from the trailing slashes.
#[must_use]
pub fn rm_trailing_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Returns `true` if the last path component is `.` or `..` (rejecting
/// `dir_create("."/".."/"dir/."/"dir/..")`).
#[must_use]
pub fn last_component_is_dot_or_dotdot(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    is_dot_or_dotdot(last)
}

/// Opens `name` relative to `dir` without following symlinks, then verifies
/// the result is a regular file with exactly one hard link.
///
/// # Errors
///
/// Returns [`Error::Nix`] if the open/stat syscalls fail, or
/// [`Error::CorruptItem`] if the opened file is not a regular file or is
/// hard-linked.
pub fn secure_open_at(dir: &impl AsFd, name: &str) -> Result<OwnedFd> {
    let fd = openat(dir, name, OFlag::O_RDONLY | OFlag::O_NOFOLLOW, Mode::empty())?;

    let stat = fstat(fd.as_fd())?;
    let is_regular = (stat.st_mode & SFlag::S_IFMT.bits()) == SFlag::S_IFREG.bits();
    if !is_regular || stat.st_nlink > 1 {
        return Err(Error::CorruptItem {
            name: name.to_string(),
            reason: format!(
                "not a regular file or hard-linked (nlink={})",
                stat.st_nlink
            ),
        });
    }

    Ok(fd)
}

/// Opens `path` as a directory without following a trailing symlink.
///
/// # Errors
///
/// Returns [`Error::Nix`] if the directory cannot be opened.
pub fn open_directory(path: &std::path::Path) -> Result<Dir> {
    Ok(Dir::open(
        path,
        OFlag::O_DIRECTORY | OFlag::O_NOFOLLOW,
        Mode::empty(),
    )?)
}

/// Opens `name` as a subdirectory relative to `dir`, following no symlinks
/// (used by recursive delete to descend into subdirectories).
///
/// # Errors
///
/// Returns [`Error::Nix`] if the subdirectory cannot be opened.
pub fn open_subdirectory(dir: &impl AsFd, name: &str) -> Result<Dir> {
    Ok(Dir::openat(dir, name, OFlag::O_DIRECTORY, Mode::empty())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_rule_rejects_dot_and_dotdot() {
        assert!(!is_correct_filename("."));
        assert!(!is_correct_filename(".."));
        assert!(!is_correct_filename(""));
    }

    #[test]
    fn filename_rule_accepts_leading_dot_names() {
        assert!(is_correct_filename(".lock"));
        assert!(is_correct_filename("time"));
        assert!(is_correct_filename("last_occurrence"));
    }

    #[test]
    fn filename_rule_rejects_slash_and_nul() {
        assert!(!is_correct_filename("a/b"));
        assert!(!is_correct_filename("a\0b"));
    }

    #[test]
    fn trailing_slashes_are_stripped() {
        assert_eq!(rm_trailing_slashes("/tmp/pd1///"), "/tmp/pd1");
        assert_eq!(rm_trailing_slashes("/tmp/pd1"), "/tmp/pd1");
        assert_eq!(rm_trailing_slashes("/"), "/");
    }

    #[test]
    fn last_component_detects_dot_forms() {
        assert!(last_component_is_dot_or_dotdot("."));
        assert!(last_component_is_dot_or_dotdot(".."));
        assert!(last_component_is_dot_or_dotdot("dir/."));
        assert!(last_component_is_dot_or_dotdot("dir/.."));
        assert!(!last_component_is_dot_or_dotdot("dir/sub"));
    }
}
