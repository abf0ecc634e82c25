// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Reading and writing individual items (files) inside a problem directory.
//!
//! Item content is sanitized on the way in from disk: NUL bytes become
//! spaces, other control characters are dropped, and a lone trailing
//! newline left by e.g. `echo blah >file` is stripped so short single-line
//! items round-trip cleanly through shell tools. Item names are validated
//! against [`crate::path::is_correct_filename`] on every write; an invalid
//! name is a caller bug, not a recoverable condition.

use crate::error::Result;
use crate::flags::OpenFlags;
use crate::path::is_correct_filename;
use nix::fcntl::{OFlag, openat};
use nix::sys::stat::{Mode, fchmod};
use nix::unistd::{Gid, Uid, fchown, unlinkat};
use std::io::{Read, Write};
use std::os::fd::AsFd;

/// Compat mapping for pre-2.1 abrt dumps that used the bare name `release`
/// for what is now `os_release`.
const LEGACY_RELEASE_NAME: &str = "release";
const OS_RELEASE_NAME: &str = "os_release";

fn resolve_legacy_name(name: &str) -> &str {
    if name == LEGACY_RELEASE_NAME {
        OS_RELEASE_NAME
    } else {
        name
    }
}

/// Reads `name` from `dir`, sanitizing its content.
///
/// Returns `Ok(None)` when [`OpenFlags::LOAD_TEXT_RETURN_NONE_ON_FAILURE`]
/// is set and the item is absent or not a valid filename; otherwise an
/// absent item reads back as an empty string.
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Nix`] on I/O failure not covered by the
/// quiet-failure flags.
pub fn load_text_ext(dir: &impl AsFd, name: &str, flags: OpenFlags) -> Result<Option<String>> {
    if !is_correct_filename(name) {
        return Ok(if flags.contains(OpenFlags::LOAD_TEXT_RETURN_NONE_ON_FAILURE) {
            None
        } else {
            Some(String::new())
        });
    }

    let name = resolve_legacy_name(name);
    let open_flags = if flags.contains(OpenFlags::OPEN_FOLLOW) {
        OFlag::O_RDONLY
    } else {
        OFlag::O_RDONLY | OFlag::O_NOFOLLOW
    };

    let fd = match openat(dir, name, open_flags, Mode::empty()) {
        Ok(fd) => fd,
        Err(nix::Error::ENOENT) => {
            return Ok(if flags.contains(OpenFlags::LOAD_TEXT_RETURN_NONE_ON_FAILURE) {
                None
            } else {
                Some(String::new())
            });
        }
        Err(other) => return Err(other.into()),
    };

    let file = std::fs::File::from(fd);
    Ok(Some(sanitize_text_content(file)?))
}

/// Convenience wrapper around [`load_text_ext`] with no flags set.
///
/// # Errors
///
/// See [`load_text_ext`].
pub fn load_text(dir: &impl AsFd, name: &str) -> Result<String> {
    Ok(load_text_ext(dir, name, OpenFlags::empty())?.unwrap_or_default())
}

pub(crate) fn sanitize_text_content(mut file: std::fs::File) -> Result<String> {
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    // Bytes >= 0x80 are left untouched rather than treated as control
    // characters, so multi-byte UTF-8 content passes through intact.
    let mut clean = Vec::with_capacity(raw.len());
    let mut newlines = 0u32;
    for &byte in &raw {
        let byte = if byte == 0 { b' ' } else { byte };
        if byte == b'\n' {
            newlines += 1;
        }
        // `is_ascii_whitespace` omits vertical tab (0x0B), but C's `isspace`
        // — what the original sanitizer keys off — keeps it alongside form
        // feed (0x0C), which `is_ascii_whitespace` does cover.
        if byte.is_ascii_whitespace() || byte == 0x0B || byte >= 0x20 {
            clean.push(byte);
        }
    }

    let last_is_newline = newlines > 0 && clean.last() == Some(&b'\n');
    if last_is_newline {
        if newlines == 1 {
            clean.pop();
        }
    } else if newlines >= 1 {
        clean.push(b'\n');
    }

    Ok(String::from_utf8_lossy(&clean).into_owned())
}

/// Writes `data` as `name`'s content, replacing any existing item.
///
/// # Panics
///
/// Panics if `name` is not a valid item filename — writing is a path the
/// caller fully controls, so an invalid name here is a programming bug.
///
/// # Errors
///
/// Returns [`Error::Nix`]/[`Error::Io`] if the underlying syscalls fail.
pub fn save_text(
    dir: &impl AsFd,
    name: &str,
    data: &str,
    owner: Option<(Uid, Gid)>,
    mode: Mode,
) -> Result<()> {
    save_binary(dir, name, data.as_bytes(), owner, mode)
}

/// Writes `data` as `name`'s content, replacing any existing item.
///
/// # Panics
///
/// Panics if `name` is not a valid item filename.
///
/// # Errors
///
/// Returns [`Error::Nix`]/[`Error::Io`] if the underlying syscalls fail.
pub fn save_binary(
    dir: &impl AsFd,
    name: &str,
    data: &[u8],
    owner: Option<(Uid, Gid)>,
    mode: Mode,
) -> Result<()> {
    assert!(
        is_correct_filename(name),
        "cannot save item: '{name}' is not a valid file name"
    );

    // Unlink first: if an existing item is hard-linked or a symlink, we
    // want a fresh regular-file inode, not to follow/extend a stale one.
    match unlinkat(dir.as_fd(), name, nix::unistd::UnlinkatFlags::NoRemoveDir) {
        Ok(()) | Err(nix::Error::ENOENT) => {}
        Err(other) => return Err(other.into()),
    }

    let fd = openat(
        dir,
        name,
        OFlag::O_WRONLY | OFlag::O_EXCL | OFlag::O_CREAT | OFlag::O_NOFOLLOW,
        mode,
    )?;

    if let Some((uid, gid)) = owner {
        fchown(fd.as_fd(), Some(uid), Some(gid))?;
    }
    fchmod(fd.as_fd(), mode)?;

    let mut file = std::fs::File::from(fd);
    file.write_all(data)?;

    Ok(())
}

/// Deletes `name` from `dir`. Missing items are not an error.
///
/// # Panics
///
/// Panics if `name` is not a valid item filename.
///
/// # Errors
///
/// Returns [`Error::Nix`] if the underlying syscall fails for a reason
/// other than the item already being absent.
pub fn delete_item(dir: &impl AsFd, name: &str) -> Result<()> {
    assert!(
        is_correct_filename(name),
        "cannot delete item: '{name}' is not a valid file name"
    );

    match unlinkat(dir.as_fd(), name, nix::unistd::UnlinkatFlags::NoRemoveDir) {
        Ok(()) | Err(nix::Error::ENOENT) => Ok(()),
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::path::open_directory;

    fn mode() -> Mode {
        Mode::from_bits_truncate(0o640)
    }

    #[test]
    fn save_then_load_round_trips_plain_text() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        save_text(&dir, "backtrace", "line one\nline two\n", None, mode()).unwrap();
        assert_eq!(load_text(&dir, "backtrace").unwrap(), "line one\nline two\n");
    }

    #[test]
    fn single_line_trailing_newline_is_stripped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        save_text(&dir, "reason", "segfault\n", None, mode()).unwrap();
        assert_eq!(load_text(&dir, "reason").unwrap(), "segfault");
    }

    #[test]
    fn unterminated_multiline_gets_newline_appended() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        save_text(&dir, "log", "a\nb", None, mode()).unwrap();
        assert_eq!(load_text(&dir, "log").unwrap(), "a\nb\n");
    }

    #[test]
    fn control_characters_are_stripped_and_nul_becomes_space() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        save_binary(&dir, "raw", b"a\x00b\x01c", None, mode()).unwrap();
        assert_eq!(load_text(&dir, "raw").unwrap(), "a b c");
    }

    #[test]
    fn vertical_tab_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        save_binary(&dir, "raw", b"a\x0Bb", None, mode()).unwrap();
        assert_eq!(load_text(&dir, "raw").unwrap(), "a\x0Bb");
    }

    #[test]
    fn legacy_release_name_maps_to_os_release() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        save_text(&dir, "os_release", "Fedora", None, mode()).unwrap();
        assert_eq!(load_text(&dir, "release").unwrap(), "Fedora");
    }

    #[test]
    fn missing_item_loads_as_empty_string() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        assert_eq!(load_text(&dir, "nope").unwrap(), "");
    }

    #[test]
    fn missing_item_with_flag_loads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        let result = load_text_ext(&dir, "nope", OpenFlags::LOAD_TEXT_RETURN_NONE_ON_FAILURE).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn delete_item_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        save_text(&dir, "x", "y", None, mode()).unwrap();
        delete_item(&dir, "x").unwrap();
        delete_item(&dir, "x").unwrap();
        assert_eq!(load_text(&dir, "x").unwrap(), "");
    }

    #[test]
    #[should_panic(expected = "not a valid file name")]
    fn save_with_bad_name_panics() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        let _ = save_text(&dir, "a/b", "x", None, mode());
    }
}
