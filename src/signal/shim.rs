//! The per-vproc signal shim: `sigaction`/`sigprocmask`/`sigpending`/
//! `sigsuspend`/`raise`/`signal`, operating against a given pid's
//! task-table entry. Ported from §4.5. Callers (the interposition gate)
//! are responsible for the "outside any active vproc, forward to real
//! libc" fall-through; these functions always assume `pid` is tracked.

use libc::c_int;
use tracing::trace;

use crate::errors::VprocError;
use crate::vproc::task_table::{default_disposition, TaskTable};

use super::disposition::{Disposition, RawHandler, SigMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum How {
    Block,
    Unblock,
    SetMask,
}

/// Runs a delivery pass: every pending-and-unblocked signal is cleared and
/// either dispatched to its handler or has its default action applied.
/// Handlers are invoked after the task-table lock is released, so a
/// handler that itself calls back into this shim does not self-deadlock.
fn deliver_pending(pid: c_int) -> Result<(), VprocError> {
    let mut fired: Vec<(c_int, RawHandler)> = Vec::new();

    TaskTable::global().with_entry_mut(pid, |entry| {
        for sig in 1..=64 {
            if !entry.pending.has(sig) || entry.blocked.has(sig) {
                continue;
            }
            entry.pending.remove(sig);
            match entry.dispositions.get(sig) {
                Disposition::Handler(h) => fired.push((sig, h)),
                Disposition::DefaultTerminate | Disposition::DefaultCore => {
                    entry.status = 128 + sig;
                    entry.exited = true;
                    entry.stopped = false;
                }
                Disposition::DefaultIgnore | Disposition::Ignore => {}
            }
        }
    })?;

    TaskTable::global().notify_all();

    for (sig, handler) in fired {
        trace!(pid, sig, "dispatching signal handler");
        handler(sig);
    }

    Ok(())
}

/// `sigactionShim`: records a new disposition for `sig`, returning the
/// previous one. `new = None` only queries the current disposition.
pub fn sigaction(pid: c_int, sig: c_int, new: Option<Disposition>) -> Result<Disposition, VprocError> {
    TaskTable::global().with_entry_mut(pid, |entry| {
        let prev = entry.dispositions.get(sig);
        if let Some(d) = new {
            entry.dispositions.set(sig, d);
        }
        prev
    })
}

/// `signalShim`: equivalent to `sigaction` with an empty mask / default
/// flags — i.e. just the disposition swap.
pub fn signal(pid: c_int, sig: c_int, handler: Option<RawHandler>) -> Result<Disposition, VprocError> {
    let disposition = match handler {
        Some(h) => Disposition::Handler(h),
        None => Disposition::Ignore,
    };
    sigaction(pid, sig, Some(disposition))
}

/// `sigprocmaskShim`/`pthread_sigmaskShim`: updates the blocked mask and
/// runs a delivery pass afterward, since unblocking a signal that is
/// already pending must deliver it immediately.
pub fn sigprocmask(pid: c_int, how: How, set: Option<SigMask>) -> Result<SigMask, VprocError> {
    let old = TaskTable::global().with_entry_mut(pid, |entry| {
        let prev = entry.blocked;
        if let Some(set) = set {
            entry.blocked = match how {
                How::Block => SigMask(prev.0 | set.0),
                How::Unblock => SigMask(prev.0 & !set.0),
                How::SetMask => set,
            };
        }
        prev
    })?;

    deliver_pending(pid)?;
    Ok(old)
}

pub fn sigpending(pid: c_int) -> Result<SigMask, VprocError> {
    TaskTable::global().with_entry(pid, |entry| entry.pending)
}

/// `raiseShim`/`killShim(self, sig)`: marks `sig` pending and runs an
/// immediate delivery pass on the calling thread.
pub fn raise(pid: c_int, sig: c_int) -> Result<(), VprocError> {
    TaskTable::global().with_entry_mut(pid, |entry| entry.pending.add(sig))?;
    TaskTable::global().notify_all();
    deliver_pending(pid)
}

/// `sigsuspendShim`: atomically installs `mask`, blocks until a signal
/// that is pending and unblocked under `mask` exists, delivers it, then
/// restores the previous mask.
pub fn sigsuspend(pid: c_int, mask: SigMask) -> Result<(), VprocError> {
    let old = TaskTable::global().with_entry_mut(pid, |entry| {
        let prev = entry.blocked;
        entry.blocked = mask;
        prev
    })?;

    TaskTable::global().wait_until(pid, |entry| {
        (1..=64).any(|sig| entry.pending.has(sig) && !entry.blocked.has(sig))
    })?;

    deliver_pending(pid)?;

    TaskTable::global().with_entry_mut(pid, |entry| entry.blocked = old)?;
    Ok(())
}

/// Resets `sig` to its POSIX default disposition (`signal(sig, SIG_DFL)`).
pub fn reset_to_default(pid: c_int, sig: c_int) -> Result<(), VprocError> {
    sigaction(pid, sig, Some(default_disposition(sig))).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vproc::task_table::TaskTable;
    use std::sync::atomic::{AtomicBool, Ordering};

    static HANDLER_RAN: AtomicBool = AtomicBool::new(false);

    extern "C" fn test_handler(_sig: c_int) {
        HANDLER_RAN.store(true, Ordering::SeqCst);
    }

    fn fresh_pid() -> c_int {
        let pid = TaskTable::global().reserve_pid(None);
        TaskTable::global().create(pid, 1);
        pid
    }

    #[test]
    fn blocked_signal_stays_pending_until_unblocked() {
        let pid = fresh_pid();
        HANDLER_RAN.store(false, Ordering::SeqCst);
        sigaction(pid, libc::SIGUSR1, Some(Disposition::Handler(test_handler))).unwrap();

        sigprocmask(pid, How::Block, Some({
            let mut m = SigMask::empty();
            m.add(libc::SIGUSR1);
            m
        }))
        .unwrap();

        raise(pid, libc::SIGUSR1).unwrap();
        assert!(!HANDLER_RAN.load(Ordering::SeqCst));
        assert!(sigpending(pid).unwrap().has(libc::SIGUSR1));

        sigprocmask(pid, How::Unblock, Some({
            let mut m = SigMask::empty();
            m.add(libc::SIGUSR1);
            m
        }))
        .unwrap();

        assert!(HANDLER_RAN.load(Ordering::SeqCst));
        assert!(!sigpending(pid).unwrap().has(libc::SIGUSR1));

        TaskTable::global().discard(pid);
    }

    #[test]
    fn default_terminate_signal_marks_task_exited() {
        let pid = fresh_pid();
        raise(pid, libc::SIGTERM).unwrap();
        let (got_pid, status) = TaskTable::global().waitpid(pid, false, false).unwrap();
        assert_eq!(got_pid, pid);
        assert_eq!(status >> 8, 128 + libc::SIGTERM);
    }
}
