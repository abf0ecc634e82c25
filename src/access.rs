// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Read-only accessibility checks that don't require holding (or even
//! being able to acquire) the directory's lock — used by callers that only
//! need to know "could this uid read this problem directory" without
//! opening a [`crate::DirHandle`].

use crate::error::{Error, Result};
use crate::path::open_directory;
use nix::sys::stat::{SFlag, fstat};
use nix::unistd::{Gid, Group, Uid, User};
use std::os::fd::AsFd;
use std::path::Path;
use tracing::debug;

/// Whether `uid` can read a problem directory, and whether it is the
/// directory's primary owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessStat {
    /// `uid` (or root, or world-readable) can read the directory's items.
    pub accessible: bool,
    /// `uid` owns the directory outright (by uid match or group
    /// membership), as opposed to merely being able to read it because it
    /// is world-readable.
    pub owned: bool,
}

fn stat_for_uid(dir: &impl AsFd, uid: Uid) -> Result<AccessStat> {
    let stat = fstat(dir.as_fd())?;
    let is_dir = (stat.st_mode & SFlag::S_IFMT.bits()) == SFlag::S_IFDIR.bits();
    if !is_dir {
        return Err(Error::NotAProblemDirectory {
            path: Path::new("<fd>").to_path_buf(),
        });
    }

    let world_readable = stat.st_mode & 0o004 != 0;
    let mut result = AccessStat {
        accessible: uid.is_root() || world_readable,
        owned: false,
    };

    let dir_uid = Uid::from_raw(stat.st_uid);
    let dir_gid = Gid::from_raw(stat.st_gid);
    let owns = uid.is_root() || world_readable || uid == dir_uid || uid_in_group(uid, dir_gid)?;

    if owns {
        debug!(uid = uid.as_raw(), "uid owns directory");
        result.accessible = true;
        result.owned = true;
    }

    Ok(result)
}

fn uid_in_group(uid: Uid, gid: Gid) -> Result<bool> {
    let Some(user) = User::from_uid(uid)? else {
        return Ok(false);
    };
    if user.gid == gid {
        return Ok(true);
    }
    let Some(group) = Group::from_gid(gid)? else {
        return Ok(false);
    };
    Ok(group.mem.iter().any(|member| *member == user.name))
}

/// Returns whether `uid` can access the already-open directory `dir`.
///
/// Unlike most operations in this crate, failure to determine
/// accessibility (e.g. the uid doesn't resolve to a passwd entry) is
/// treated as "not accessible" rather than propagated, matching the
/// original's `can't determine accessibility` fallback.
#[must_use]
pub fn accessible_by_fd(dir: &impl AsFd, uid: Uid) -> bool {
    stat_for_uid(dir, uid)
        .map(|stat| stat.accessible)
        .unwrap_or(false)
}

/// Opens `path` and returns whether `uid` can access it.
///
/// # Errors
///
/// Returns [`Error::NotAProblemDirectory`] if `path` cannot be opened as a
/// directory at all (the caller may want to distinguish that from "opened
/// fine, but not accessible").
pub fn accessible_by_uid(path: &Path, uid: Uid) -> Result<bool> {
    let dir = open_directory(path).map_err(|_| Error::NotAProblemDirectory {
        path: path.to_path_buf(),
    })?;
    Ok(accessible_by_fd(&dir, uid))
}
