// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Parsing and validation of the canonical `time` item: a decimal Unix
//! timestamp, optionally newline-terminated, that marks a directory as a
//! valid problem directory.

use crate::error::{Error, Result};
use crate::path::secure_open_at;
use std::io::Read;
use std::os::fd::AsFd;

/// Largest decimal representation of an `i64` timestamp, plus headroom —
/// mirrors the original's `sizeof(time_t) * 3 + 1` buffer sizing.
const TIME_BUF_LEN: usize = size_of::<i64>() * 3 + 1;

/// Exclusive upper bound: `2^(bits(time_t) - 1) - 1`, i.e. `i64::MAX`.
const MAX_TIME_T: i64 = i64::MAX;

/// Reads and validates `name` (conventionally `"time"`) relative to `dir`.
///
/// # Errors
///
/// Returns [`Error::CorruptItem`] if the file is too long, empty, contains
/// anything but ASCII digits (with at most one optional trailing newline),
/// or encodes a value `>= MAX_TIME_T`. Returns [`Error::Nix`]/[`Error::Io`]
/// on lower-level I/O failure.
pub fn parse_time_file(dir: &impl AsFd, name: &str) -> Result<i64> {
    let fd = secure_open_at(dir, name)?;
    let mut file = std::fs::File::from(fd);

    let mut buf = vec![0_u8; TIME_BUF_LEN];
    let mut total = 0;
    loop {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
        if total == buf.len() {
            return Err(Error::CorruptItem {
                name: name.to_string(),
                reason: format!("file is too long to be a valid timestamp (max {TIME_BUF_LEN})"),
            });
        }
    }

    let mut text = std::str::from_utf8(&buf[..total])
        .map_err(|_| Error::CorruptItem {
            name: name.to_string(),
            reason: "not valid UTF-8".to_string(),
        })?;

    if let Some(stripped) = text.strip_suffix('\n') {
        text = stripped;
    }

    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::CorruptItem {
            name: name.to_string(),
            reason: format!("does not contain a valid unix timestamp ('{text}')"),
        });
    }

    let value: i64 = text.parse().map_err(|_| Error::CorruptItem {
        name: name.to_string(),
        reason: format!("value out of range ('{text}')"),
    })?;

    if value >= MAX_TIME_T {
        return Err(Error::CorruptItem {
            name: name.to_string(),
            reason: format!("value out of range ('{text}')"),
        });
    }

    Ok(value)
}
