// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end lifecycle scenarios from `SPEC_FULL.md` §8: create, read,
//! reported_to idempotence, and delete, all within a single process.

use anyhow::{Context, Result};
use dumpdir::{DirHandle, Error, OpenFlags, RetryPolicy};
use nix::sys::stat::Mode;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        symlink_retry_usleep: 500,
        wait_for_other_process_usleep: 2_000,
        create_lock_usleep: 500,
        no_time_file_usleep: 1_000,
        no_time_file_count: 3,
        rmdir_fail_usleep: 500,
        rmdir_fail_count: 5,
    }
}

#[test]
fn scenario_create_then_read() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let path = tmp.path().join("pd1");

    let mut handle = DirHandle::create(&path, None, Mode::from_bits_truncate(0o640), fast_policy())
        .context("create")?;
    handle.create_basic_files(None, None).context("create_basic_files")?;
    handle.save_text("analyzer", "ccpp").context("save analyzer")?;
    handle.close();

    let handle = DirHandle::open(&path, OpenFlags::empty(), fast_policy()).context("reopen")?;
    assert_eq!(handle.load_text("analyzer")?, "ccpp");
    assert!(handle.time() >= 0);
    handle.close();

    Ok(())
}

#[test]
fn scenario_stale_lock_is_reclaimed() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let path = tmp.path().join("pd3");

    {
        let mut handle =
            DirHandle::create(&path, None, Mode::from_bits_truncate(0o640), fast_policy())?;
        handle.create_basic_files(None, None)?;
        handle.close();
    }
    std::fs::remove_file(path.join(".lock")).context("remove real lock")?;
    std::os::unix::fs::symlink("999999", path.join(".lock")).context("plant stale lock")?;

    let handle = DirHandle::open(&path, OpenFlags::empty(), fast_policy()).context("open")?;
    let lock_target = std::fs::read_link(path.join(".lock")).context("readlink")?;
    assert_ne!(lock_target.to_string_lossy(), "999999");
    handle.close();

    Ok(())
}

#[test]
fn scenario_non_dump_directory_is_rejected() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let path = tmp.path().join("plain");
    std::fs::create_dir(&path).context("mkdir")?;

    let result = DirHandle::open(&path, OpenFlags::DONT_WAIT_FOR_LOCK, fast_policy());
    assert!(matches!(result, Err(Error::NotAProblemDirectory { .. })));

    Ok(())
}

#[test]
fn scenario_reported_to_idempotence() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let path = tmp.path().join("pd5");

    let mut handle =
        DirHandle::create(&path, None, Mode::from_bits_truncate(0o640), fast_policy())?;
    handle.create_basic_files(None, None)?;
    handle.add_reported_to("Bugzilla: URL=http://x/1")?;
    handle.add_reported_to("Bugzilla: URL=http://x/1")?;

    let content = handle.load_text("reported_to")?;
    assert_eq!(content.lines().count(), 1);

    let found = handle
        .find_in_reported_to("Bugzilla: ")?
        .context("expected a match")?;
    assert_eq!(found.url.as_deref(), Some("http://x/1"));

    handle.close();
    Ok(())
}

#[test]
fn scenario_delete_leaves_no_trace() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let path = tmp.path().join("pd6");

    let mut handle =
        DirHandle::create(&path, None, Mode::from_bits_truncate(0o640), fast_policy())?;
    handle.create_basic_files(None, None)?;
    handle.save_text("backtrace", "#0 crash()\n")?;
    handle.delete()?;

    assert!(!path.exists());
    let reopened = DirHandle::open(&path, OpenFlags::empty(), fast_policy());
    assert!(matches!(reopened, Err(Error::NotFound { .. })));

    Ok(())
}
