//! Single source of truth for the environment variables this crate reads.
//! Centralized so trimming/validation rules are applied consistently
//! instead of scattered `env::var` calls.

use std::env;

pub const PATH_TRUNCATE: &str = "PATH_TRUNCATE";
pub const CONTAINER_ROOT: &str = "PSCALI_CONTAINER_ROOT";
pub const SYSFILES_ROOT: &str = "PSCALI_SYSFILES_ROOT";
pub const LINES: &str = "LINES";
pub const COLUMNS: &str = "COLUMNS";

/// Reads `PATH_TRUNCATE`, trimmed. `None` when unset, empty, or whitespace-only.
pub fn path_truncate() -> Option<String> {
    non_empty(PATH_TRUNCATE)
}

/// Reads `PSCALI_CONTAINER_ROOT`, trimmed.
pub fn container_root() -> Option<String> {
    non_empty(CONTAINER_ROOT)
}

/// Reads `PSCALI_SYSFILES_ROOT`, trimmed.
pub fn sysfiles_root() -> Option<String> {
    non_empty(SYSFILES_ROOT)
}

/// Parses `LINES`/`COLUMNS` into a fallback window size, falling back to
/// `(80, 24)` when unset or unparsable.
pub fn fallback_winsize() -> (u16, u16) {
    let cols = env::var(COLUMNS)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(80);
    let rows = env::var(LINES)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(24);
    (cols, rows)
}

fn non_empty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}
