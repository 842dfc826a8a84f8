//! Symbol resolution for the interposition engine: resolves real libc
//! entry points via `RTLD_NEXT`/`RTLD_DEFAULT`, rejecting any symbol that
//! binds back into this very image (self-binding), which would recurse
//! forever. Protected by a CAS owner-identifier lock rather than a mutex,
//! since resolution can itself be entered reentrantly from a nested
//! interposed call on the same thread while the first resolution is still
//! in flight (e.g. a warm-up call triggering lazy PLT binding).

use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

/// 0 means unowned. Otherwise holds the owning thread's id (never 0 on any
/// platform we run on).
static RESOLVE_OWNER: AtomicU64 = AtomicU64::new(0);
static RESOLVE_DEPTH: AtomicU64 = AtomicU64::new(0);

fn current_thread_tag() -> u64 {
    // A stable-for-the-thread, nonzero tag. The pthread handle itself
    // satisfies both properties on every platform nix/libc support here.
    unsafe { libc::pthread_self() as u64 }
}

struct ResolveGuard {
    acquired: bool,
}

impl ResolveGuard {
    fn acquire() -> Self {
        let me = current_thread_tag();
        loop {
            match RESOLVE_OWNER.compare_exchange_weak(0, me, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    RESOLVE_DEPTH.store(1, Ordering::Release);
                    return ResolveGuard { acquired: true };
                }
                Err(owner) if owner == me => {
                    RESOLVE_DEPTH.fetch_add(1, Ordering::AcqRel);
                    return ResolveGuard { acquired: false };
                }
                Err(_) => std::hint::spin_loop(),
            }
        }
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        if RESOLVE_DEPTH.fetch_sub(1, Ordering::AcqRel) == 1 {
            RESOLVE_OWNER.store(0, Ordering::Release);
        }
    }
}

/// Whether the calling thread already holds the resolver lock (i.e. we are
/// nested inside our own resolution).
pub fn is_resolving() -> bool {
    RESOLVE_OWNER.load(Ordering::Acquire) == current_thread_tag()
}

/// Looks up `name` starting at `RTLD_NEXT`, falling back to `RTLD_DEFAULT`.
/// Returns `None` if unresolved or if the resolved symbol binds back into
/// this image (self-binding, which would recurse).
pub fn resolve(name: &str) -> Option<*mut c_void> {
    let _guard = ResolveGuard::acquire();
    let cname = CString::new(name).ok()?;

    let mut candidate = unsafe { libc::dlsym(libc::RTLD_NEXT, cname.as_ptr()) };
    if candidate.is_null() {
        candidate = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
    }
    if candidate.is_null() {
        trace!(symbol = name, "symbol not found by dlsym");
        return None;
    }

    if is_self_bound(candidate) {
        trace!(symbol = name, "rejecting self-bound symbol");
        return None;
    }

    Some(candidate)
}

/// True if `addr` resolves (via `dladdr`) into this very shared object,
/// which would mean we just "resolved" our own shim and calling through it
/// would recurse forever.
fn is_self_bound(addr: *mut c_void) -> bool {
    unsafe {
        let mut candidate_info: libc::Dl_info = std::mem::zeroed();
        if libc::dladdr(addr, &mut candidate_info) == 0 || candidate_info.dli_fbase.is_null() {
            return false;
        }

        let mut self_info: libc::Dl_info = std::mem::zeroed();
        let anchor = is_self_bound as *const () as *mut c_void;
        if libc::dladdr(anchor, &mut self_info) == 0 || self_info.dli_fbase.is_null() {
            return false;
        }

        candidate_info.dli_fbase == self_info.dli_fbase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_real_libc_symbol() {
        // getpid is an uncontroversial symbol to resolve through the
        // real-libc path; it must not resolve back into us.
        assert!(resolve("getpid").is_some());
    }

    #[test]
    fn unknown_symbol_resolves_to_none() {
        assert!(resolve("this_symbol_does_not_exist_anywhere_xyz").is_none());
    }

    #[test]
    fn resolver_lock_is_reentrant_on_same_thread() {
        let _outer = ResolveGuard::acquire();
        assert!(is_resolving());
        let _inner = ResolveGuard::acquire();
        assert!(is_resolving());
    }
}
