// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Bit-flag options accepted by the open/create/load family of operations.

use bitflags::bitflags;

bitflags! {
    /// Option flags threaded through `open`, `create_skeleton`, and the item
    /// load/save helpers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Suppress the "does not exist" log line.
        const FAIL_QUIETLY_ON_MISSING = 1 << 0;
        /// Suppress the permission-denied log line.
        const FAIL_QUIETLY_ON_PERMISSION_DENIED = 1 << 1;
        /// Allow `open` to return a read-only (unlocked) handle when the
        /// directory is not writable.
        const OPEN_READONLY = 1 << 2;
        /// Create intermediate directories during `create_skeleton`.
        const CREATE_PARENTS = 1 << 3;
        /// Do not retry the "time file missing" loop; fail immediately.
        const DONT_WAIT_FOR_LOCK = 1 << 4;
        /// Distinguish "absent/invalid" (returns `None`) from "empty content".
        const LOAD_TEXT_RETURN_NONE_ON_FAILURE = 1 << 5;
        /// Allow following symlinks (used only for absolute system paths).
        const OPEN_FOLLOW = 1 << 6;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::empty()
    }
}
