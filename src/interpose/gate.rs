//! Enablement policy for the interposition engine (§4.7): decides, for the
//! calling thread, whether libc calls should take the fast path (raw
//! wrapper straight to the host) or the slow path (vproc shim).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::bypass;

/// Master on/off switch. Off by default; a host embedding this runtime
/// flips it on once it has created at least one vproc and is ready to
/// accept interposed calls.
static MASTER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Set once the engine has something useful to route to: either an active
/// vproc, or a non-default session stdio. Distinct from `MASTER_ENABLED`
/// because a host may flip the master switch on during startup before any
/// vproc/session exists yet.
static READY: AtomicBool = AtomicBool::new(false);

/// The real host main thread's id, recorded once at bootstrap (which
/// always runs on that thread, before any application code gets a chance
/// to spawn others). `0` means not yet recorded. The main thread always
/// keeps running host code per §4.7, regardless of anything else.
static MAIN_THREAD: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static EXPLICITLY_BYPASSED: Cell<bool> = const { Cell::new(false) };
}

/// Records the calling thread as the main thread. Called once from
/// [`super::warmup::warm_up`], which runs at process bootstrap.
pub fn record_main_thread() {
    MAIN_THREAD.store(current_thread_tag(), Ordering::Release);
}

fn current_thread_tag() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

pub fn enable_master() {
    MASTER_ENABLED.store(true, Ordering::Release);
}

pub fn disable_master() {
    MASTER_ENABLED.store(false, Ordering::Release);
}

pub fn mark_ready() {
    READY.store(true, Ordering::Release);
}

pub fn is_ready() -> bool {
    READY.load(Ordering::Acquire)
}

/// Marks the calling thread as explicitly bypassed: it always takes the
/// raw path regardless of any active vproc. Used for threads a host
/// process wants to keep behaving like ordinary host threads (a watchdog
/// thread, say).
pub fn mark_thread_bypassed() {
    EXPLICITLY_BYPASSED.with(|c| c.set(true));
}

pub fn unmark_thread_bypassed() {
    EXPLICITLY_BYPASSED.with(|c| c.set(false));
}

fn is_explicitly_bypassed() -> bool {
    EXPLICITLY_BYPASSED.with(|c| c.get())
}

fn is_main_thread() -> bool {
    let recorded = MAIN_THREAD.load(Ordering::Acquire);
    recorded != 0 && recorded == current_thread_tag()
}

fn session_non_default() -> bool {
    crate::session::stdio::current().is_some()
}

/// Whether the calling thread should route the current call through the
/// vproc shim rather than straight to the host, per §4.7:
///
/// - the master switch must be on,
/// - bootstrap must have completed,
/// - the thread's raw-bypass depth must be zero,
/// - the thread must not be the main thread,
/// - the thread must not be explicitly marked bypassed,
/// - and either the engine is "ready" or a non-default session stdio is
///   active on this thread.
pub fn should_intercept() -> bool {
    MASTER_ENABLED.load(Ordering::Acquire)
        && bypass::is_bootstrapped()
        && !bypass::is_bypassed()
        && !is_main_thread()
        && !is_explicitly_bypassed()
        && (is_ready() || session_non_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_master_never_intercepts() {
        disable_master();
        assert!(!should_intercept());
    }

    #[test]
    fn explicit_bypass_overrides_everything() {
        enable_master();
        bypass::mark_bootstrapped();
        mark_ready();
        mark_thread_bypassed();
        assert!(!should_intercept());
        unmark_thread_bypassed();
        disable_master();
    }

    #[test]
    fn recorded_main_thread_is_excluded() {
        enable_master();
        bypass::mark_bootstrapped();
        mark_ready();
        record_main_thread();
        assert!(!should_intercept());
        MAIN_THREAD.store(0, Ordering::Release);
        disable_master();
    }
}
