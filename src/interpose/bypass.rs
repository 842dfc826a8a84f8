//! Reentrancy guards for the interposition engine: a per-thread depth
//! counter for the normal case, and a process-wide atomic counter used
//! before thread-local storage is safe to touch (early in dynamic-linker
//! bootstrap).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Set once bootstrap (symbol warm-up, TLS init) has completed. Before
/// this flips, raw calls must go through the global counter instead of TLS.
static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);
static GLOBAL_BYPASS_DEPTH: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static LOCAL_BYPASS_DEPTH: Cell<usize> = const { Cell::new(0) };
}

pub fn mark_bootstrapped() {
    BOOTSTRAPPED.store(true, Ordering::Release);
}

pub fn is_bootstrapped() -> bool {
    BOOTSTRAPPED.load(Ordering::Acquire)
}

/// True while the calling thread is inside a raw-bypass region: the
/// interposition gate must not intercept its own provisioning/resolution
/// calls.
pub fn is_bypassed() -> bool {
    if !is_bootstrapped() {
        return GLOBAL_BYPASS_DEPTH.load(Ordering::Acquire) > 0;
    }
    LOCAL_BYPASS_DEPTH.with(|d| d.get() > 0)
}

fn enter() {
    if !is_bootstrapped() {
        GLOBAL_BYPASS_DEPTH.fetch_add(1, Ordering::AcqRel);
    } else {
        LOCAL_BYPASS_DEPTH.with(|d| d.set(d.get() + 1));
    }
}

fn exit() {
    if !is_bootstrapped() {
        GLOBAL_BYPASS_DEPTH.fetch_sub(1, Ordering::AcqRel);
    } else {
        LOCAL_BYPASS_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Runs `f` with the calling thread's bypass depth incremented, so any
/// libc calls `f` makes are treated as raw host calls rather than
/// recursing back into the vproc shim. Used by path/pty provisioning,
/// which must not be virtualized while setting itself up.
pub fn with_raw_bypass<T>(f: impl FnOnce() -> T) -> T {
    enter();
    let result = f();
    exit();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_bypass_tracks_depth() {
        assert!(!is_bypassed());
        with_raw_bypass(|| {
            assert!(is_bypassed());
            with_raw_bypass(|| {
                assert!(is_bypassed());
            });
            assert!(is_bypassed());
        });
        assert!(!is_bypassed());
    }
}
