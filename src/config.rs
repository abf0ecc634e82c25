// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Layered configuration for the directory manager's retry/backoff timing.
//!
//! The original implementation hard-codes six `usleep` intervals and two
//! retry counts as preprocessor constants. Here they live in a
//! [`RetryPolicy`] that can be overridden from a config file or
//! `DUMPDIR_*` environment variables, the same way the teacher's
//! `Config::load` layers `~/.config/catenary/config.toml` under
//! `CATENARY_*` env vars — mainly so tests can shrink the wall-clock sleeps
//! instead of waiting out real timers.

use crate::error::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Retry/backoff timing for the lock manager and the delete loop.
///
/// Field names mirror the original preprocessor constants so the mapping
/// back to the source behavior is obvious.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Sleep between `symlink`/`readlink` retries when the lock target
    /// vanished out from under us (microseconds).
    pub symlink_retry_usleep: u64,
    /// Sleep while waiting for a live peer holding the lock (microseconds).
    pub wait_for_other_process_usleep: u64,
    /// Sleep while waiting for a peer that locked a directory we just
    /// created (microseconds). Must differ from
    /// `wait_for_other_process_usleep`: we have locking priority on a dir
    /// we just created, so we poll it much faster.
    pub create_lock_usleep: u64,
    /// Sleep after unlocking because the `time` item was missing, before
    /// retrying the whole lock sequence (microseconds).
    pub no_time_file_usleep: u64,
    /// Number of times to retry the "time file missing" loop before giving
    /// up with "not a problem directory".
    pub no_time_file_count: u32,
    /// Sleep between `rmdir` retries during delete (microseconds).
    pub rmdir_fail_usleep: u64,
    /// Number of `rmdir` retries before giving up.
    pub rmdir_fail_count: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            symlink_retry_usleep: 10_000,
            wait_for_other_process_usleep: 500_000,
            create_lock_usleep: 10_000,
            no_time_file_usleep: 50_000,
            no_time_file_count: 10,
            rmdir_fail_usleep: 10_000,
            rmdir_fail_count: 50,
        }
    }
}

impl RetryPolicy {
    /// Loads a `RetryPolicy`, layering (in increasing precedence) built-in
    /// defaults, `~/.config/dumpdir/config.toml`, an explicit file, and
    /// `DUMPDIR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured source cannot be parsed.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("symlink_retry_usleep", defaults.symlink_retry_usleep)?
            .set_default(
                "wait_for_other_process_usleep",
                defaults.wait_for_other_process_usleep,
            )?
            .set_default("create_lock_usleep", defaults.create_lock_usleep)?
            .set_default("no_time_file_usleep", defaults.no_time_file_usleep)?
            .set_default("no_time_file_count", defaults.no_time_file_count)?
            .set_default("rmdir_fail_usleep", defaults.rmdir_fail_usleep)?
            .set_default("rmdir_fail_count", defaults.rmdir_fail_count)?;

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("dumpdir").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix("DUMPDIR"));

        let built = builder.build()?;
        Ok(built.try_deserialize()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.symlink_retry_usleep, 10_000);
        assert_eq!(policy.wait_for_other_process_usleep, 500_000);
        assert_eq!(policy.create_lock_usleep, 10_000);
        assert_eq!(policy.no_time_file_usleep, 50_000);
        assert_eq!(policy.no_time_file_count, 10);
        assert_eq!(policy.rmdir_fail_usleep, 10_000);
        assert_eq!(policy.rmdir_fail_count, 50);
        assert_ne!(
            policy.create_lock_usleep,
            policy.wait_for_other_process_usleep
        );
    }

    #[test]
    fn load_without_overrides_matches_defaults() {
        let policy = RetryPolicy::load(None).unwrap();
        assert_eq!(policy.no_time_file_count, 10);
    }
}
