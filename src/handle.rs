// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! [`DirHandle`]: the in-memory handle to an on-disk problem directory,
//! composing the path/lock/item primitives into the public create/open/
//! close/delete lifecycle.

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::flags::OpenFlags;
use crate::items::{self, load_text_ext, save_text};
use crate::lock::{self, LockIntent};
use crate::path::{last_component_is_dot_or_dotdot, open_directory, rm_trailing_slashes};
use crate::reported_to::{self, ReportResult};
use crate::time_file::parse_time_file;
use nix::dir::Dir;
use nix::sys::stat::{Mode, fchmod, fstat};
use nix::unistd::{Gid, Uid, User, fchown};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const TIME_NAME: &str = "time";
const LAST_OCCURRENCE_NAME: &str = "last_occurrence";
const UID_NAME: &str = "uid";
const KERNEL_NAME: &str = "kernel";
const ARCHITECTURE_NAME: &str = "architecture";
const HOSTNAME_NAME: &str = "hostname";
const OS_RELEASE_NAME: &str = "os_release";
const OS_RELEASE_IN_ROOTDIR_NAME: &str = "os_release_in_rootdir";
const ABRT_USER_NAME: &str = "abrt";

const HOST_SYSTEM_RELEASE: &str = "/etc/system-release";
const HOST_REDHAT_RELEASE: &str = "/etc/redhat-release";

/// A live handle onto a problem directory.
///
/// Writable iff [`DirHandle::is_locked`] — matches invariant 1 in
/// `SPEC_FULL.md` §3. Holding the lock is recorded in `locked`; [`Drop`]
/// unlocks as a backstop if a caller forgets to `close`/`delete`
/// explicitly, but callers should still prefer the explicit path so errors
/// during unlock aren't silently swallowed.
pub struct DirHandle {
    dirname: PathBuf,
    dir: Dir,
    locked: bool,
    mode: Mode,
    uid: Option<Uid>,
    gid: Option<Gid>,
    time: i64,
    policy: RetryPolicy,
}

impl std::fmt::Debug for DirHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirHandle")
            .field("dirname", &self.dirname)
            .field("locked", &self.locked)
            .field("mode", &self.mode)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl DirHandle {
    /// The canonicalized (trailing-slash-stripped) directory path.
    #[must_use]
    pub fn dirname(&self) -> &Path {
        &self.dirname
    }

    /// Whether this handle holds the `.lock` for its directory.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The parsed `time` item value, or a negative number if it has not
    /// been read/written through this handle yet.
    #[must_use]
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Item file mode (masked to `0o666`, per §3).
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn owner(&self) -> Option<(Uid, Gid)> {
        match (self.uid, self.gid) {
            (Some(uid), Some(gid)) => Some((uid, gid)),
            _ => None,
        }
    }

    /// Opens an existing problem directory.
    ///
    /// On `EACCES` with [`OpenFlags::OPEN_READONLY`] set, falls back to a
    /// read-only (unlocked) handle if the directory is at least readable
    /// and its `time` item parses; otherwise the permission error
    /// propagates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `path` does not exist or is not a
    /// directory, [`Error::NotAProblemDirectory`] if it has no valid
    /// `time` item (after the lock manager's retry budget, see
    /// `SPEC_FULL.md` §4.3), or [`Error::PermissionDenied`] /
    /// [`Error::Nix`] for other failures.
    pub fn open(path: &Path, flags: OpenFlags, policy: RetryPolicy) -> Result<Self> {
        let dirname = canonicalize_dirname(path);

        let dir = match open_directory(&dirname) {
            Ok(dir) => dir,
            Err(Error::Nix(nix::Error::ENOENT | nix::Error::ENOTDIR)) => {
                return Err(Error::NotFound { path: dirname });
            }
            Err(other) => return Err(other),
        };

        let stat = fstat(dir.as_fd())?;
        let mode = Mode::from_bits_truncate(stat.st_mode & 0o666);

        match lock::lock(&dir, &dirname, LockIntent::Open, &policy, flags) {
            Ok(()) => {}
            Err(Error::Nix(nix::Error::EACCES)) if flags.contains(OpenFlags::OPEN_READONLY) => {
                return open_readonly_fallback(dir, dirname, mode, &policy);
            }
            Err(other) => return Err(other),
        }

        let time = parse_time_file(&dir, TIME_NAME)?;

        let mut handle = Self {
            dirname,
            dir,
            locked: true,
            mode,
            uid: None,
            gid: None,
            time,
            policy,
        };

        if Uid::effective().is_root() {
            let stat = fstat(handle.dir.as_fd())?;
            handle.uid = Some(Uid::from_raw(stat.st_uid));
            handle.gid = Some(Gid::from_raw(stat.st_gid));
        }

        Ok(handle)
    }

    /// Creates a new, empty problem directory skeleton: makes the
    /// directory, locks it, and `fchmod`s it to counteract the process
    /// umask. Does not write any items — callers write `time` and the
    /// other well-known items afterward (see [`DirHandle::create_basic_files`]).
    ///
    /// `dir_mode` is derived from `mode` by copying the read bits into the
    /// corresponding execute bits (`mode | ((mode & 0o444) >> 2)`), so a
    /// directory created with `0o640` item mode becomes traversable
    /// (`0o750`) by whoever can read its items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Nix`] if the last path component is `.`/`..`, or if
    /// directory creation, opening, or locking fails.
    pub fn create_skeleton(
        path: &Path,
        crash_uid: Option<Uid>,
        mode: Mode,
        flags: OpenFlags,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let dirname = canonicalize_dirname(path);
        let dirname_str = dirname.to_string_lossy().into_owned();
        if last_component_is_dot_or_dotdot(&dirname_str) {
            return Err(Error::CorruptItem {
                name: dirname_str,
                reason: "directory path's last component is '.' or '..'".to_string(),
            });
        }

        let dir_mode = Mode::from_bits_truncate(mode.bits() | ((mode.bits() & 0o444) >> 2));

        if flags.contains(OpenFlags::CREATE_PARENTS) {
            if let Some(parent) = dirname.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        match nix::unistd::mkdir(&dirname, dir_mode) {
            Ok(()) | Err(nix::Error::EEXIST) => {}
            Err(other) => return Err(other.into()),
        }

        let dir = open_directory(&dirname)?;
        lock::lock(&dir, &dirname, LockIntent::Create, &policy, flags)?;
        fchmod(dir.as_fd(), dir_mode)?;

        let mut handle = Self {
            dirname,
            dir,
            locked: true,
            mode,
            uid: None,
            gid: None,
            time: -1,
            policy,
        };

        if let Some(crash_uid) = crash_uid {
            handle.uid = Some(resolve_abrt_uid());
            handle.gid = Some(resolve_primary_gid(crash_uid));
        }

        Ok(handle)
    }

    /// Applies `(dd_uid, dd_gid)` to the directory inode itself (not its
    /// items — see [`crate::iter::sanitize_mode_and_owner`] for that).
    ///
    /// A no-op if no owner was recorded (e.g. `crash_uid` was `None` at
    /// [`DirHandle::create_skeleton`] time).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Nix`] if `fchown` fails.
    pub fn reset_ownership(&self) -> Result<()> {
        let Some((uid, gid)) = self.owner() else {
            return Ok(());
        };
        if let Err(err) = fchown(self.dir.as_fd(), Some(uid), Some(gid)) {
            warn!(dir = %self.dirname.display(), error = %err, "could not reset directory ownership");
            return Err(err.into());
        }
        Ok(())
    }

    /// Convenience wrapper: `create_skeleton` with parent-directory
    /// creation forced on, followed by [`DirHandle::reset_ownership`].
    ///
    /// # Errors
    ///
    /// See [`DirHandle::create_skeleton`] and [`DirHandle::reset_ownership`].
    pub fn create(
        path: &Path,
        crash_uid: Option<Uid>,
        mode: Mode,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let handle = Self::create_skeleton(
            path,
            crash_uid,
            mode,
            OpenFlags::CREATE_PARENTS,
            policy,
        )?;
        handle.reset_ownership()?;
        Ok(handle)
    }

    /// Writes the well-known items every problem directory carries: `time`
    /// / `last_occurrence` (current Unix time, only if `time` is not
    /// already present), `uid` (if `crash_uid` is given), and
    /// `kernel`/`architecture`/`hostname` (always, from `uname`). If
    /// `os_release` is absent, loads it from the host's
    /// `/etc/system-release` (falling back to `/etc/redhat-release`). If
    /// `chroot` is given, additionally loads `<chroot>/etc/system-release`
    /// into `os_release_in_rootdir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Nix`]/[`Error::Io`] if any item write or host file
    /// read fails.
    pub fn create_basic_files(
        &mut self,
        crash_uid: Option<Uid>,
        chroot: Option<&Path>,
    ) -> Result<()> {
        if parse_time_file(&self.dir, TIME_NAME).is_err() {
            let now = current_unix_time();
            self.save_text(TIME_NAME, &now.to_string())?;
            self.save_text(LAST_OCCURRENCE_NAME, &now.to_string())?;
            self.time = now;
        }

        if let Some(crash_uid) = crash_uid {
            self.save_text(UID_NAME, &crash_uid.as_raw().to_string())?;
        }

        let uts = nix::sys::utsname::uname()?;
        self.save_text(KERNEL_NAME, &uts.release().to_string_lossy())?;
        self.save_text(ARCHITECTURE_NAME, &uts.machine().to_string_lossy())?;
        self.save_text(HOSTNAME_NAME, &uts.nodename().to_string_lossy())?;

        if self.load_text(OS_RELEASE_NAME)?.is_empty() {
            if let Some(release) = load_host_release(Path::new("/"))? {
                self.save_text(OS_RELEASE_NAME, &release)?;
            }
        }

        if let Some(chroot) = chroot {
            if let Some(release) = load_host_release(chroot)? {
                self.save_text(OS_RELEASE_IN_ROOTDIR_NAME, &release)?;
            }
        }

        Ok(())
    }

    /// Reads `name`, sanitized per `SPEC_FULL.md` §4.6.
    ///
    /// # Errors
    ///
    /// See [`crate::items::load_text`].
    pub fn load_text(&self, name: &str) -> Result<String> {
        items::load_text(&self.dir, name)
    }

    /// Reads `name` honoring `flags` (e.g.
    /// [`OpenFlags::LOAD_TEXT_RETURN_NONE_ON_FAILURE`]).
    ///
    /// # Errors
    ///
    /// See [`crate::items::load_text_ext`].
    pub fn load_text_ext(&self, name: &str, flags: OpenFlags) -> Result<Option<String>> {
        load_text_ext(&self.dir, name, flags)
    }

    /// Writes `data` as item `name`.
    ///
    /// # Panics
    ///
    /// Panics if this handle is not locked, or if `name` fails
    /// [`crate::path::is_correct_filename`] — both are programming errors
    /// per `SPEC_FULL.md` §7 kind 7.
    ///
    /// # Errors
    ///
    /// See [`crate::items::save_text`].
    pub fn save_text(&self, name: &str, data: &str) -> Result<()> {
        assert!(self.locked, "cannot write '{name}': handle is not locked");
        save_text(&self.dir, name, data, self.owner(), self.mode)
    }

    /// Writes `data` as item `name`.
    ///
    /// # Panics
    ///
    /// Panics if this handle is not locked, or if `name` is invalid.
    ///
    /// # Errors
    ///
    /// See [`crate::items::save_binary`].
    pub fn save_binary(&self, name: &str, data: &[u8]) -> Result<()> {
        assert!(self.locked, "cannot write '{name}': handle is not locked");
        items::save_binary(&self.dir, name, data, self.owner(), self.mode)
    }

    /// Removes item `name`. Missing items are not an error.
    ///
    /// # Panics
    ///
    /// Panics if this handle is not locked.
    ///
    /// # Errors
    ///
    /// See [`crate::items::delete_item`].
    pub fn delete_item(&self, name: &str) -> Result<()> {
        assert!(self.locked, "cannot delete '{name}': handle is not locked");
        items::delete_item(&self.dir, name)
    }

    /// Appends `line` to `reported_to` unless already present.
    ///
    /// # Panics
    ///
    /// Panics if this handle is not locked.
    ///
    /// # Errors
    ///
    /// See [`crate::reported_to::add_reported_to`].
    pub fn add_reported_to(&self, line: &str) -> Result<()> {
        assert!(self.locked, "cannot append to reported_to: handle is not locked");
        reported_to::add_reported_to(&self.dir, line, self.owner(), self.mode)
    }

    /// Finds the last `reported_to` line starting with `prefix`.
    ///
    /// # Errors
    ///
    /// See [`crate::reported_to::find_in_reported_to`].
    pub fn find_in_reported_to(&self, prefix: &str) -> Result<Option<ReportResult>> {
        reported_to::find_in_reported_to(&self.dir, prefix)
    }

    /// Opens a fresh iteration stream over this directory's items.
    ///
    /// Advance it with [`crate::iter::get_next_file`].
    ///
    /// # Errors
    ///
    /// See [`crate::iter::init_next_file`].
    pub fn init_next_file(&self) -> Result<Dir> {
        crate::iter::init_next_file(&self.dir)
    }

    /// Re-applies this handle's recorded mode and owner to every item.
    ///
    /// # Errors
    ///
    /// See [`crate::iter::sanitize_mode_and_owner`].
    pub fn sanitize_mode_and_owner(&self) -> Result<()> {
        crate::iter::sanitize_mode_and_owner(&self.dir, self.owner(), self.mode)
    }

    /// Returns whether `uid` can access this directory (stat-based, no
    /// lock required).
    #[must_use]
    pub fn accessible_by_uid(&self, uid: Uid) -> bool {
        crate::access::accessible_by_fd(&self.dir, uid)
    }

    /// Releases the lock (if held) and drops the handle. Idempotent:
    /// calling `close` on an already-unlocked handle is a no-op beyond
    /// consuming it.
    pub fn close(mut self) {
        self.unlock_if_held();
    }

    /// Deletes the directory and everything in it.
    ///
    /// Recursively removes all items except `.lock`, unlinks `.lock`,
    /// then retries `rmdir` up to [`RetryPolicy::rmdir_fail_count`] times
    /// (a concurrent `lock()` racing the delete may recreate `.lock`
    /// between our unlink and our `rmdir`; that locker observes the
    /// missing `time` item and backs off on its own, so we only need to
    /// outlast its retries).
    ///
    /// # Panics
    ///
    /// Panics if this handle is not locked — deleting through an unlocked
    /// handle would mean deleting a directory we never gained exclusive
    /// access to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeleteDidNotConverge`] if `rmdir` still fails
    /// after the retry budget. Returns [`Error::Nix`] on lower-level
    /// failure while removing contents.
    pub fn delete(mut self) -> Result<()> {
        assert!(self.locked, "cannot delete: handle is not locked");

        crate::delete::delete_tree(&self.dir, true)?;
        lock::unlock(&self.dir, &self.dirname);
        self.locked = false;

        let mut remaining = self.policy.rmdir_fail_count;
        loop {
            match nix::unistd::rmdir(&self.dirname) {
                Ok(()) => return Ok(()),
                Err(nix::Error::ENOENT) => return Ok(()),
                Err(other) => {
                    remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        return Err(Error::DeleteDidNotConverge {
                            path: self.dirname.clone(),
                        });
                    }
                    debug!(dir = %self.dirname.display(), error = %other, remaining, "rmdir retry");
                    std::thread::sleep(std::time::Duration::from_micros(
                        self.policy.rmdir_fail_usleep,
                    ));
                }
            }
        }
    }

    fn unlock_if_held(&mut self) {
        if self.locked {
            lock::unlock(&self.dir, &self.dirname);
            self.locked = false;
        }
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        self.unlock_if_held();
    }
}

fn open_readonly_fallback(
    dir: Dir,
    dirname: PathBuf,
    mode: Mode,
    policy: &RetryPolicy,
) -> Result<DirHandle> {
    if !crate::access::accessible_by_fd(&dir, Uid::effective()) {
        return Err(Error::PermissionDenied { path: dirname });
    }
    let time = parse_time_file(&dir, TIME_NAME)?;
    Ok(DirHandle {
        dirname,
        dir,
        locked: false,
        mode,
        uid: None,
        gid: None,
        time,
        policy: policy.clone(),
    })
}

fn canonicalize_dirname(path: &Path) -> PathBuf {
    PathBuf::from(rm_trailing_slashes(&path.to_string_lossy()))
}

fn current_unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}

fn resolve_abrt_uid() -> Uid {
    match User::from_name(ABRT_USER_NAME) {
        Ok(Some(user)) => user.uid,
        Ok(None) => {
            warn!("no '{ABRT_USER_NAME}' user on this system; falling back to uid 0");
            Uid::from_raw(0)
        }
        Err(err) => {
            warn!(error = %err, "could not look up '{ABRT_USER_NAME}' user; falling back to uid 0");
            Uid::from_raw(0)
        }
    }
}

fn resolve_primary_gid(uid: Uid) -> Gid {
    match User::from_uid(uid) {
        Ok(Some(user)) => user.gid,
        Ok(None) => {
            warn!(uid = uid.as_raw(), "no passwd entry for uid; falling back to gid 0");
            Gid::from_raw(0)
        }
        Err(err) => {
            warn!(uid = uid.as_raw(), error = %err, "could not look up passwd entry; falling back to gid 0");
            Gid::from_raw(0)
        }
    }
}

fn load_host_release(root: &Path) -> Result<Option<String>> {
    let candidates = [
        root.join(HOST_SYSTEM_RELEASE.trim_start_matches('/')),
        root.join(HOST_REDHAT_RELEASE.trim_start_matches('/')),
    ];

    for candidate in candidates {
        match std::fs::File::open(&candidate) {
            Ok(file) => return Ok(Some(items::sanitize_text_content(file)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(None)
}
