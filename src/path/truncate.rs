//! `PATH_TRUNCATE` prefix mapping: `expand`/`strip` between the virtual
//! root and a configured host prefix, ported from `path_truncate.c`.

use std::path::Path;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::env;
use super::normalize::normalize_absolute;
use super::reserved::is_reserved_device_path;

#[derive(Default, Clone)]
struct Prefix {
    /// Normalized, trailing-`/`-stripped absolute host prefix.
    primary: Option<String>,
    /// Derived `/private`-stripped alias, when `primary` starts with `/private`.
    alias: Option<String>,
}

fn state() -> &'static RwLock<Prefix> {
    static STATE: Lazy<RwLock<Prefix>> = Lazy::new(|| RwLock::new(Prefix::default()));
    &STATE
}

/// Re-reads `PATH_TRUNCATE` and recomputes the primary/alias pair,
/// invalidating any previously cached prefix. Called once at startup and
/// whenever a caller explicitly wants to pick up a changed environment
/// (tests in particular construct and tear down prefixes repeatedly).
pub fn reset_caches() {
    let mut guard = state().write();
    *guard = resolve_prefix();
}

fn resolve_prefix() -> Prefix {
    let Some(raw) = env::path_truncate() else {
        return Prefix::default();
    };

    if !raw.starts_with('/') {
        warn!(value = %raw, "PATH_TRUNCATE is not absolute, ignoring");
        return Prefix::default();
    }

    // Prefer the canonicalized form; fall back to the raw value if the
    // directory doesn't exist yet (provisioning happens afterward).
    let mut resolved = std::fs::canonicalize(&raw)
        .ok()
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or(raw);

    while resolved.len() > 1 && resolved.ends_with('/') {
        resolved.pop();
    }

    if resolved.is_empty() || resolved == "/" {
        resolved = std::env::var("HOME").unwrap_or_default();
        while resolved.len() > 1 && resolved.ends_with('/') {
            resolved.pop();
        }
        if resolved.is_empty() {
            return Prefix::default();
        }
    }

    let alias = resolved
        .strip_prefix("/private")
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .map(str::to_string);

    debug!(primary = %resolved, alias = ?alias, "PATH_TRUNCATE prefix resolved");

    Prefix {
        primary: Some(resolved),
        alias,
    }
}

/// Whether the path virtualization layer is active (a valid prefix is set).
pub fn enabled() -> bool {
    state().read().primary.is_some()
}

/// The resolved primary prefix, if the layer is active. Used by callers
/// (the pty subsystem's `/dev/pts/N` provisioning) that need the host
/// directory directly rather than going through `expand`/`strip`.
pub fn prefix() -> Option<String> {
    state().read().primary.clone()
}

fn matches_stored_prefix(path: &str, prefix: &str) -> bool {
    path == prefix || path.strip_prefix(prefix).map_or(false, |rest| rest.starts_with('/'))
}

/// Maps a virtual-root path onto the host filesystem. Relative inputs and
/// reserved device paths are returned unchanged; on any normalization
/// failure the input is copied back verbatim (never fails the caller).
pub fn expand(input: &str) -> String {
    if !input.starts_with('/') || is_reserved_device_path(input) {
        return input.to_string();
    }

    let guard = state().read();
    let Some(primary) = guard.primary.clone() else {
        return input.to_string();
    };
    let alias = guard.alias.clone();
    drop(guard);

    let normalized = match normalize_absolute(input) {
        Ok(n) => n,
        Err(_) => return input.to_string(),
    };

    if normalized == "/dev/null" || normalized == "/dev/zero" {
        let leaf = &normalized[5..];
        return format!("{primary}/dev/{leaf}");
    }

    if matches_stored_prefix(&normalized, &primary) {
        return normalized;
    }
    if let Some(alias) = &alias {
        if matches_stored_prefix(&normalized, alias) {
            let rest = &normalized[alias.len()..];
            return format!("{primary}{rest}");
        }
    }

    if normalized == "/" {
        primary
    } else {
        format!("{primary}{normalized}")
    }
}

/// Maps a host path back onto the virtual root. Paths outside the
/// truncated tree are returned unchanged.
pub fn strip(host_path: &str) -> String {
    if !host_path.starts_with('/') {
        return host_path.to_string();
    }

    let guard = state().read();
    let Some(primary) = guard.primary.clone() else {
        return host_path.to_string();
    };
    let alias = guard.alias.clone();
    drop(guard);

    for candidate in [Some(primary.as_str()), alias.as_deref()].into_iter().flatten() {
        if matches_stored_prefix(host_path, candidate) {
            let rest = &host_path[candidate.len()..];
            return if rest.is_empty() { "/".to_string() } else { rest.to_string() };
        }
    }

    host_path.to_string()
}

/// Exports `PATH_TRUNCATE` to the resolved primary value and provisions
/// the sandbox directories/device nodes under it. No-op when disabled.
pub fn apply_environment() {
    let primary = { state().read().primary.clone() };
    let Some(primary) = primary else {
        std::env::remove_var(env::PATH_TRUNCATE);
        return;
    };

    std::env::set_var(env::PATH_TRUNCATE, &primary);
    trace!(prefix = %primary, "applying PATH_TRUNCATE environment");

    super::provision::provision_tmp(&primary);
    super::provision::provision_dev(&primary);
    super::provision::provision_devpts_root(&primary);
}

/// Exposed for tests and callers that want to point the layer at an
/// arbitrary directory without going through the environment.
pub fn set_prefix_for_test(path: &Path) {
    let mut s = path.to_string_lossy().to_string();
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    let alias = s
        .strip_prefix("/private")
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .map(str::to_string);
    *state().write() = Prefix {
        primary: Some(s),
        alias,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_prefix(p: &str, f: impl FnOnce()) {
        set_prefix_for_test(Path::new(p));
        f();
        *state().write() = Prefix::default();
    }

    #[test]
    fn expand_prepends_primary() {
        with_prefix("/tmp/root", || {
            assert_eq!(expand("/sandbox.txt"), "/tmp/root/sandbox.txt");
        });
    }

    #[test]
    fn expand_is_idempotent() {
        with_prefix("/tmp/root", || {
            let once = expand("/a/b");
            assert_eq!(expand(&once), once);
        });
    }

    #[test]
    fn strip_then_expand_round_trips() {
        with_prefix("/tmp/root", || {
            let host = expand("/a/b");
            assert_eq!(strip(&host), "/a/b");
        });
    }

    #[test]
    fn dev_null_maps_under_prefix() {
        with_prefix("/tmp/root", || {
            assert_eq!(expand("/dev/null"), "/tmp/root/dev/null");
        });
    }

    #[test]
    fn reserved_paths_bypass_mapping() {
        with_prefix("/tmp/root", || {
            assert_eq!(expand("/dev/tty"), "/dev/tty");
        });
    }

    #[test]
    fn disabled_layer_is_identity() {
        assert_eq!(expand("/a/b"), "/a/b");
        assert_eq!(strip("/a/b"), "/a/b");
    }
}
