// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A single-dump-dir-operation helper process.
//!
//! The lock manager's PID-liveness branch only means anything across real
//! process boundaries, not threads inside one test binary, so the
//! integration tests spawn this as a second OS process rather than
//! simulating contention with threads.

use clap::{Parser, Subcommand};
use dumpdir::{DirHandle, OpenFlags, RetryPolicy};
use nix::sys::stat::Mode;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dd-worker", about = "Single problem-directory operation, run as a standalone process for cross-process lock tests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a problem directory, optionally sleeping before writing
    /// `time`/`last_occurrence` (to let a concurrent opener observe the
    /// pre-`time` window).
    Create {
        /// Directory to create.
        path: PathBuf,
        /// Milliseconds to sleep after the skeleton exists but before
        /// `create_basic_files` writes `time`.
        #[arg(long, default_value_t = 0)]
        hold_before_time_ms: u64,
    },
    /// Opens a problem directory, holding the lock for a while before
    /// closing — used to exercise the "peer holds a live lock" branch.
    LockHold {
        /// Directory to open.
        path: PathBuf,
        /// Milliseconds to hold the lock before closing.
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
    },
    /// Opens a problem directory and reports success/failure via exit
    /// code only (no stdout payload, to keep the process quiet and
    /// machine-checkable).
    Open {
        /// Directory to open.
        path: PathBuf,
        /// Fail immediately instead of waiting for the `time` item.
        #[arg(long)]
        dont_wait: bool,
    },
    /// Opens and deletes a problem directory.
    Delete {
        /// Directory to delete.
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).try_init().ok();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "dd-worker operation failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> dumpdir::Result<()> {
    let policy = RetryPolicy::load(None).unwrap_or_default();

    match cli.command {
        Command::Create {
            path,
            hold_before_time_ms,
        } => {
            let mut handle =
                DirHandle::create_skeleton(&path, None, Mode::from_bits_truncate(0o640), OpenFlags::CREATE_PARENTS, policy)?;
            if hold_before_time_ms > 0 {
                std::thread::sleep(Duration::from_millis(hold_before_time_ms));
            }
            handle.create_basic_files(None, None)?;
            handle.reset_ownership()?;
            info!(dir = %path.display(), "created");
            handle.close();
            Ok(())
        }
        Command::LockHold { path, hold_ms } => {
            let handle = DirHandle::open(&path, OpenFlags::empty(), policy)?;
            info!(dir = %path.display(), "locked");
            std::thread::sleep(Duration::from_millis(hold_ms));
            handle.close();
            Ok(())
        }
        Command::Open { path, dont_wait } => {
            let flags = if dont_wait {
                OpenFlags::DONT_WAIT_FOR_LOCK
            } else {
                OpenFlags::empty()
            };
            let handle = DirHandle::open(&path, flags, policy)?;
            info!(dir = %path.display(), "opened");
            handle.close();
            Ok(())
        }
        Command::Delete { path } => {
            let handle = DirHandle::open(&path, OpenFlags::empty(), policy)?;
            handle.delete()?;
            info!(dir = %path.display(), "deleted");
            Ok(())
        }
    }
}
