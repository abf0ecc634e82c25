// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Recursive removal of a problem directory's contents.
//!
//! `.lock` is skipped until everything else is gone, then removed last —
//! so a concurrent `lock()` call racing the delete still sees a directory
//! with no `time` item (because `time` was already removed) and backs off
//! on its own, rather than us having to coordinate with it directly.

use crate::error::Result;
use crate::path::open_subdirectory;
use nix::unistd::{UnlinkatFlags, unlinkat};
use std::os::fd::AsFd;
use tracing::warn;

const LOCK_NAME: &str = ".lock";

/// Removes every entry inside `dir`, recursing into subdirectories.
/// `skip_lock` controls whether `.lock` is removed now (`false`, used for
/// recursive calls into subdirectories, which cannot contain a lock) or
/// deferred to the very end of the top-level call (`true`).
///
/// Treats the directory already being gone as success, since a concurrent
/// deleter may have already finished the job.
///
/// # Errors
///
/// Returns [`Error::Nix`] if an entry cannot be removed for a reason other
/// than it already being absent.
pub(crate) fn delete_tree(dir: &impl AsFd, skip_lock: bool) -> Result<()> {
    let mut stream = match crate::iter::init_next_file(dir) {
        Ok(stream) => stream,
        Err(_) => return Ok(()),
    };

    let mut unlink_lock_at_end = false;

    loop {
        let entries = collect_entry_batch(&mut stream)?;
        if entries.is_empty() {
            break;
        }

        for name in entries {
            if skip_lock && name == LOCK_NAME {
                unlink_lock_at_end = true;
                continue;
            }
            remove_entry(dir, &name)?;
        }
    }

    if unlink_lock_at_end {
        match unlinkat(dir.as_fd(), LOCK_NAME, UnlinkatFlags::NoRemoveDir) {
            Ok(()) | Err(nix::Error::ENOENT) => {}
            Err(other) => return Err(other.into()),
        }
    }

    Ok(())
}

fn collect_entry_batch(stream: &mut nix::dir::Dir) -> Result<Vec<String>> {
    let mut names = Vec::new();
    while let Some(name) = crate::iter::get_next_entry(stream)? {
        names.push(name);
    }
    Ok(names)
}

fn remove_entry(dir: &impl AsFd, name: &str) -> Result<()> {
    match unlinkat(dir.as_fd(), name, UnlinkatFlags::NoRemoveDir) {
        Ok(()) | Err(nix::Error::ENOENT) => Ok(()),
        Err(nix::Error::EISDIR) => {
            let subdir = open_subdirectory(dir, name)?;
            delete_tree(&subdir, false)?;
            drop(subdir);
            match unlinkat(dir.as_fd(), name, UnlinkatFlags::RemoveDir) {
                Ok(()) | Err(nix::Error::ENOENT) => Ok(()),
                Err(other) => Err(other.into()),
            }
        }
        Err(other) => {
            warn!(entry = %name, error = %other, "could not remove entry");
            Err(other.into())
        }
    }
}
