// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The `reported_to` log: a deduplicated, append-only record of which
//! reporter plugins have already processed a problem directory, and a
//! last-match parser for pulling a specific reporter's result back out.

use crate::error::Result;
use crate::flags::OpenFlags;
use crate::items::{load_text_ext, save_text};
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Uid};
use std::os::fd::AsFd;

const REPORTED_TO_NAME: &str = "reported_to";

/// A single reporter's recorded result, parsed out of one `reported_to`
/// line such as `Bugzilla: URL=https://example.com/123`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportResult {
    /// The `URL=...` token on the line, if present.
    pub url: Option<String>,
    /// The `MSG=...` token on the line, if present. `MSG=` consumes the
    /// rest of the line, matching the original parser.
    pub msg: Option<String>,
}

/// Appends `line` to the `reported_to` log unless it is already present
/// verbatim (as a whole line, not a substring).
///
/// # Errors
///
/// Returns [`Error::Nix`]/[`Error::Io`] on I/O failure.
pub fn add_reported_to(
    dir: &impl AsFd,
    line: &str,
    owner: Option<(Uid, Gid)>,
    mode: Mode,
) -> Result<()> {
    let existing = load_text_ext(
        dir,
        REPORTED_TO_NAME,
        OpenFlags::FAIL_QUIETLY_ON_MISSING | OpenFlags::LOAD_TEXT_RETURN_NONE_ON_FAILURE,
    )?;

    let updated = match existing {
        Some(content) => {
            if content.lines().any(|existing_line| existing_line == line) {
                return Ok(());
            }
            let mut updated = content;
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(line);
            updated.push('\n');
            updated
        }
        None => format!("{line}\n"),
    };

    save_text(dir, REPORTED_TO_NAME, &updated, owner, mode)
}

fn parse_reported_line(line: &str) -> ReportResult {
    let mut result = ReportResult::default();
    let mut rest = line;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());

        if let Some(msg) = rest.strip_prefix("MSG=") {
            result.msg = Some(msg.to_string());
            break;
        }
        if let Some(url) = rest.get(0..end).and_then(|token| token.strip_prefix("URL=")) {
            result.url = Some(url.to_string());
        }

        rest = &rest[end..];
    }
    result
}

/// Finds the most recent (last) `reported_to` line starting with `prefix`
/// and parses its `URL=`/`MSG=` tokens.
///
/// # Errors
///
/// Returns [`Error::Nix`]/[`Error::Io`] on I/O failure.
pub fn find_in_reported_to(dir: &impl AsFd, prefix: &str) -> Result<Option<ReportResult>> {
    let Some(content) = load_text_ext(
        dir,
        REPORTED_TO_NAME,
        OpenFlags::FAIL_QUIETLY_ON_MISSING | OpenFlags::LOAD_TEXT_RETURN_NONE_ON_FAILURE,
    )?
    else {
        return Ok(None);
    };

    let found = content
        .lines()
        .filter_map(|line| line.strip_prefix(prefix))
        .next_back();

    Ok(found.map(parse_reported_line))
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
    fn append_is_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        add_reported_to(&dir, "Bugzilla: URL=https://example.com/1", None, mode()).unwrap();
        add_reported_to(&dir, "Bugzilla: URL=https://example.com/1", None, mode()).unwrap();
        let content = load_text_ext(&dir, "reported_to", OpenFlags::empty())
            .unwrap()
            .unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn distinct_lines_both_appear() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        add_reported_to(&dir, "Bugzilla: URL=https://example.com/1", None, mode()).unwrap();
        add_reported_to(&dir, "Mantis: URL=https://example.com/2", None, mode()).unwrap();
        let content = load_text_ext(&dir, "reported_to", OpenFlags::empty())
            .unwrap()
            .unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn find_returns_last_match_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        add_reported_to(&dir, "Bugzilla: URL=https://example.com/1", None, mode()).unwrap();
        add_reported_to(&dir, "Bugzilla: URL=https://example.com/2", None, mode()).unwrap();

        let found = find_in_reported_to(&dir, "Bugzilla: ").unwrap().unwrap();
        assert_eq!(found.url.as_deref(), Some("https://example.com/2"));
    }

    #[test]
    fn msg_token_consumes_rest_of_line() {
        let parsed = parse_reported_line("URL=https://x MSG=could not connect to server");
        assert_eq!(parsed.url.as_deref(), Some("https://x"));
        assert_eq!(parsed.msg.as_deref(), Some("could not connect to server"));
    }

    #[test]
    fn find_on_absent_log_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = open_directory(tmp.path()).unwrap();
        assert!(find_in_reported_to(&dir, "Bugzilla: ").unwrap().is_none());
    }
}
