// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Symlink-based advisory lock used to serialize writers to a problem
//! directory across processes on the same host.
//!
//! The lock is a symlink named `.lock` whose target text is the decimal PID
//! of the locking process. Symlink creation is atomic, which is what makes
//! this safe without any other coordination primitive.
//!
//! There are two cases where, after creating `.lock`, we discover the
//! directory isn't actually free for us:
//! * another process just created the directory but hasn't locked it yet.
//! * another process is deleting the directory and we slipped in and
//!   created `.lock` after it removed all other items but before it
//!   `rmdir`'d the now-empty directory.
//!
//! Both are detected by the absence of the `time` item, which every valid
//! problem directory has. If we lock a directory and don't see `time`, we
//! drop the lock immediately and back off — the creator just re-tries
//! locking, and the deleter just retries `rmdir`. A third case produces the
//! same symptom: the path was never a problem directory at all, just an
//! ordinary directory the caller pointed us at by mistake. We tell that
//! apart from the races above with a retry counter
//! ([`RetryPolicy::no_time_file_count`]): pure races resolve in one or two
//! iterations, a plain directory never will.

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::flags::OpenFlags;
use crate::time_file::parse_time_file;
use nix::unistd::{Pid, getpid, readlinkat, symlinkat, unlinkat};
use std::os::fd::AsFd;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, warn};

const LOCK_NAME: &str = ".lock";
const TIME_NAME: &str = "time";

/// Why `lock()` is being called: distinguishes the two retry cadences the
/// original overloads onto a single sleep-duration parameter (see
/// `SPEC_FULL.md` §4.3 / §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockIntent {
    /// Locking a directory we just created ourselves — we have priority,
    /// so poll any unexpected contender quickly.
    Create,
    /// Locking a directory presumed to already exist, possibly owned by a
    /// live peer doing real work — poll slowly.
    Open,
}

enum TryLockOutcome {
    Acquired,
    Busy,
}

/// Attempts a single round of symlink-based lock acquisition, retrying only
/// the narrow "lock vanished between symlink and readlink" race internally.
fn try_create_lock(dir: &impl AsFd, dirname: &Path, policy: &RetryPolicy) -> Result<TryLockOutcome> {
    let my_pid = getpid();
    let pid_str = my_pid.as_raw().to_string();

    loop {
        match symlinkat(pid_str.as_str(), Some(dir.as_fd()), LOCK_NAME) {
            Ok(()) => {
                debug!(dir = %dirname.display(), pid = %pid_str, "locked");
                return Ok(TryLockOutcome::Acquired);
            }
            Err(nix::Error::EEXIST) => {}
            Err(other) => return Err(Error::Nix(other)),
        }

        let target = match readlinkat(dir.as_fd(), LOCK_NAME) {
            Ok(target) => target,
            Err(nix::Error::ENOENT) => {
                // Someone unlocked between our symlink and this readlink.
                sleep(Duration::from_micros(policy.symlink_retry_usleep));
                continue;
            }
            Err(other) => return Err(Error::Nix(other)),
        };
        let target = target.to_string_lossy().into_owned();

        if target == pid_str {
            warn!(dir = %dirname.display(), "lock already held by us");
            return Ok(TryLockOutcome::Busy);
        }

        if !target.is_empty() && target.bytes().all(|b| b.is_ascii_digit()) {
            if Path::new(&format!("/proc/{target}")).exists() {
                debug!(dir = %dirname.display(), holder = %target, "locked by a live peer");
                return Ok(TryLockOutcome::Busy);
            }
            warn!(dir = %dirname.display(), holder = %target, "reclaiming stale lock");
        } else {
            warn!(dir = %dirname.display(), target = %target, "reclaiming corrupt lock");
        }

        match unlinkat(dir.as_fd(), LOCK_NAME, nix::unistd::UnlinkatFlags::NoRemoveDir) {
            Ok(()) | Err(nix::Error::ENOENT) => {}
            Err(other) => return Err(Error::Nix(other)),
        }
    }
}

/// Acquires the lock, retrying at the cadence implied by `intent`.
///
/// When `intent` is [`LockIntent::Open`], also verifies that the `time`
/// item is present once the lock is held; if it is not, the lock is
/// dropped and the whole sequence retries up to
/// [`RetryPolicy::no_time_file_count`] times before failing with
/// [`Error::NotAProblemDirectory`].
///
/// # Errors
///
/// Returns [`Error::NotAProblemDirectory`] if the retry budget is exhausted
/// (or `flags` requests no waiting) and `time` never appears. Returns
/// [`Error::Nix`] on lower-level syscall failure.
pub(crate) fn lock(
    dir: &impl AsFd,
    dirname: &Path,
    intent: LockIntent,
    policy: &RetryPolicy,
    flags: OpenFlags,
) -> Result<()> {
    let sleep_usec = match intent {
        LockIntent::Create => policy.create_lock_usleep,
        LockIntent::Open => policy.wait_for_other_process_usleep,
    };

    let mut remaining = policy.no_time_file_count;
    loop {
        loop {
            match try_create_lock(dir, dirname, policy)? {
                TryLockOutcome::Acquired => break,
                TryLockOutcome::Busy => sleep(Duration::from_micros(sleep_usec)),
            }
        }

        if intent != LockIntent::Open {
            return Ok(());
        }

        if parse_time_file(dir, TIME_NAME).is_ok() {
            return Ok(());
        }

        // We locked it, but there's no `time` item: a creator or deleter
        // raced us, or this was never a problem directory.
        force_unlink_lock(dir, dirname);
        warn!(dir = %dirname.display(), "unlocked (no or corrupted time file)");

        remaining = remaining.saturating_sub(1);
        if remaining == 0 || flags.contains(OpenFlags::DONT_WAIT_FOR_LOCK) {
            return Err(Error::NotAProblemDirectory {
                path: dirname.to_path_buf(),
            });
        }
        sleep(Duration::from_micros(policy.no_time_file_usleep));
    }
}

/// Releases the lock.
///
/// # Panics
///
/// Panics if `.lock` cannot be removed for any reason other than it
/// already being gone — per the taxonomy in `SPEC_FULL.md` §7, this
/// indicates a programming bug or a corrupted filesystem state the caller
/// cannot meaningfully recover from.
pub(crate) fn unlock(dir: &impl AsFd, dirname: &Path) {
    force_unlink_lock(dir, dirname);
    debug!(dir = %dirname.display(), "unlocked");
}

fn force_unlink_lock(dir: &impl AsFd, dirname: &Path) {
    match unlinkat(dir.as_fd(), LOCK_NAME, nix::unistd::UnlinkatFlags::NoRemoveDir) {
        Ok(()) | Err(nix::Error::ENOENT) => {}
        #[allow(clippy::panic, reason = "failing to release our own lock is an unrecoverable filesystem-state bug")]
        Err(other) => {
            panic!("cannot remove lock file in '{}': {other}", dirname.display());
        }
    }
}

/// Returns this process's PID as `symlinkat` would encode it, for tests
/// that need to assert on the lock's target text.
#[must_use]
pub fn current_pid() -> Pid {
    getpid()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::path::open_directory;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            symlink_retry_usleep: 500,
            wait_for_other_process_usleep: 1_000,
            create_lock_usleep: 500,
            no_time_file_usleep: 500,
            no_time_file_count: 3,
            rmdir_fail_usleep: 500,
            rmdir_fail_count: 3,
        }
    }

    fn write_time(tmp: &std::path::Path) {
        std::fs::write(tmp.join("time"), "1700000000").unwrap();
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        write_time(tmp.path());
        std::os::unix::fs::symlink("999999", tmp.path().join(".lock")).unwrap();

        let dir = open_directory(tmp.path()).unwrap();
        lock(&dir, tmp.path(), LockIntent::Open, &fast_policy(), OpenFlags::empty()).unwrap();

        let target = std::fs::read_link(tmp.path().join(".lock")).unwrap();
        assert_eq!(target.to_string_lossy(), getpid().as_raw().to_string());
    }

    #[test]
    fn missing_time_file_fails_after_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        let result = lock(&dir, tmp.path(), LockIntent::Open, &fast_policy(), OpenFlags::empty());
        assert!(matches!(result, Err(Error::NotAProblemDirectory { .. })));
        assert!(!tmp.path().join(".lock").exists());
    }

    #[test]
    fn dont_wait_flag_fails_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        let result = lock(
            &dir,
            tmp.path(),
            LockIntent::Open,
            &fast_policy(),
            OpenFlags::DONT_WAIT_FOR_LOCK,
        );
        assert!(matches!(result, Err(Error::NotAProblemDirectory { .. })));
    }

    #[test]
    fn create_intent_does_not_require_time_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        lock(&dir, tmp.path(), LockIntent::Create, &fast_policy(), OpenFlags::empty()).unwrap();
        assert!(tmp.path().join(".lock").exists());
    }

    #[test]
    fn unlock_removes_lock_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        lock(&dir, tmp.path(), LockIntent::Create, &fast_policy(), OpenFlags::empty()).unwrap();
        unlock(&dir, tmp.path());
        assert!(!tmp.path().join(".lock").exists());
    }
}
