//! Bootstrap warm-up: pre-resolves and exercises a handful of syscalls
//! before any application code gets a chance to recurse into the
//! interposer mid-resolution.

use std::ffi::CString;

use tracing::trace;

use super::bypass;
use super::gate;
use super::resolver::resolve;

const WARM_SYMBOLS: &[&str] = &["getpid", "read", "write", "stat", "access"];

/// Resolves the warm-up symbol set and performs a handful of harmless
/// real syscalls (`getpid`, a zero-length read/write on `/dev/null`, a
/// `stat`/`access` on it) so their function pointers and any lazy PLT
/// bindings are already populated before the gate goes live. Also records
/// the calling thread as the main thread — this always runs at bootstrap,
/// on the host's original thread, before application code gets a chance
/// to spawn others.
pub fn warm_up() {
    gate::record_main_thread();

    for name in WARM_SYMBOLS {
        if resolve(name).is_none() {
            trace!(symbol = name, "warm-up symbol unresolved");
        }
    }

    unsafe {
        let _ = libc::getpid();

        let path = CString::new("/dev/null").unwrap();
        let fd = libc::open(path.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            let mut buf = [0u8; 1];
            let _ = libc::read(fd, buf.as_mut_ptr() as *mut _, 0);
            let _ = libc::write(fd, buf.as_ptr() as *const _, 0);

            let mut st: libc::stat = std::mem::zeroed();
            let _ = libc::fstat(fd, &mut st);

            libc::close(fd);
        }
        let _ = libc::access(path.as_ptr(), libc::F_OK);
    }

    bypass::mark_bootstrapped();
    trace!("interposer warm-up complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_up_does_not_panic() {
        warm_up();
    }
}
