//! Current-vproc-aware entry points: the thin layer between the
//! interposition gate and the pid-keyed [`TaskTable`]/[`signal`] operations.
//! Every function here resolves "which pid" from [`super::core::current`]
//! and is a no-op-free-function wrapper — the interposition gate decides
//! *whether* to call these at all; these never themselves check for an
//! active vproc.

use libc::c_int;

use crate::errors::VprocError;
use crate::signal::disposition::SigMask;
use crate::signal::{self, Disposition, How};

use super::core::current;
use super::task_table::{RealThreadDirected, Snapshot, TaskTable};

fn current_pid() -> Result<i32, VprocError> {
    current().map(|vp| vp.pid()).ok_or(VprocError::UntrackedPid(0))
}

/// `vprocGetPidShim`.
pub fn getpid_shim() -> Option<i32> {
    current().map(|vp| vp.pid())
}

/// `vprocWaitPidShim`. `pid <= 0` (wait-for-any-child forms) is not
/// meaningful for a single-vproc caller and is rejected with
/// [`VprocError::UntrackedPid`] so the gate falls back to the host.
pub fn wait_pid_shim(pid: i32, wnohang: bool, wuntraced: bool) -> Result<(i32, i32), VprocError> {
    if pid <= 0 {
        return Err(VprocError::UntrackedPid(pid));
    }
    TaskTable::global().waitpid(pid, wnohang, wuntraced)
}

/// `vprocKillShim`. Negative `pid` is a process-group kill.
pub fn kill_shim(pid: i32, sig: c_int) -> Result<(), VprocError> {
    let table = TaskTable::global();
    if pid < 0 {
        table.kill_pgrp(-pid, sig, &RealThreadDirected);
        Ok(())
    } else {
        table.kill(pid, sig, &RealThreadDirected)
    }
}

/// `vprocSetPgidShim`. `pid == 0` means "the calling vproc".
pub fn set_pgid_shim(pid: i32, pgid: i32) -> Result<(), VprocError> {
    let pid = if pid == 0 { current_pid()? } else { pid };
    TaskTable::global().setpgid(pid, pgid)
}

/// `vprocSetsidShim` for the calling vproc.
pub fn setsid_shim() -> Result<i32, VprocError> {
    let pid = current_pid()?;
    TaskTable::global().setsid(pid)
}

/// `vprocGetSidShim`. `pid == 0` means "the calling vproc".
pub fn get_sid_shim(pid: i32) -> Result<i32, VprocError> {
    let pid = if pid == 0 { current_pid()? } else { pid };
    TaskTable::global().get_sid(pid)
}

pub fn get_pgrp_shim() -> Result<i32, VprocError> {
    let pid = current_pid()?;
    TaskTable::global().get_pgid(pid)
}

/// `vprocTcgetpgrpShim`: the foreground pgid of the calling vproc's session.
pub fn tcgetpgrp_shim() -> Result<i32, VprocError> {
    let pid = current_pid()?;
    let sid = TaskTable::global().get_sid(pid)?;
    TaskTable::global().get_foreground_pgid(sid)
}

/// `vprocTcsetpgrpShim`.
pub fn tcsetpgrp_shim(pgid: i32) -> Result<(), VprocError> {
    let pid = current_pid()?;
    let sid = TaskTable::global().get_sid(pid)?;
    TaskTable::global().set_foreground_pgid(sid, pgid)
}

pub fn register_thread_shim(tid: libc::pthread_t) -> Result<(), VprocError> {
    let vp = current().ok_or(VprocError::UntrackedPid(0))?;
    vp.register_thread(tid);
    Ok(())
}

pub fn mark_exit_shim(code: i32) -> Result<(), VprocError> {
    let vp = current().ok_or(VprocError::UntrackedPid(0))?;
    vp.mark_exit(code);
    Ok(())
}

pub fn snapshot_shim() -> Vec<Snapshot> {
    TaskTable::global().snapshot()
}

// -- signal shims, resolved against the calling vproc's pid -------------

pub fn sigaction_shim(sig: c_int, new: Option<Disposition>) -> Result<Disposition, VprocError> {
    signal::sigaction(current_pid()?, sig, new)
}

pub fn signal_shim(sig: c_int, handler: Option<signal::RawHandler>) -> Result<Disposition, VprocError> {
    signal::signal(current_pid()?, sig, handler)
}

pub fn sigprocmask_shim(how: How, set: Option<SigMask>) -> Result<SigMask, VprocError> {
    signal::sigprocmask(current_pid()?, how, set)
}

pub fn sigpending_shim() -> Result<SigMask, VprocError> {
    signal::sigpending(current_pid()?)
}

pub fn sigsuspend_shim(mask: SigMask) -> Result<(), VprocError> {
    signal::sigsuspend(current_pid()?, mask)
}

pub fn raise_shim(sig: c_int) -> Result<(), VprocError> {
    signal::raise(current_pid()?, sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vproc::options::VProcOptions;
    use crate::vproc::core::{activate, create, deactivate, destroy};

    #[test]
    fn getpid_shim_reflects_active_vproc() {
        assert!(getpid_shim().is_none());
        let vp = create(VProcOptions::default(), 1).unwrap();
        activate(vp.clone());
        assert_eq!(getpid_shim(), Some(vp.pid()));
        deactivate();
        destroy(&vp);
        TaskTable::global().discard(vp.pid());
    }

    #[test]
    fn setsid_then_tcsetpgrp_then_tcgetpgrp_round_trips() {
        let vp = create(VProcOptions::default(), 1).unwrap();
        activate(vp.clone());

        setsid_shim().unwrap();
        tcsetpgrp_shim(vp.pid()).unwrap();
        assert_eq!(tcgetpgrp_shim().unwrap(), vp.pid());

        deactivate();
        destroy(&vp);
        TaskTable::global().discard(vp.pid());
    }

    #[test]
    fn wait_pid_shim_rejects_non_positive_pid() {
        assert!(matches!(wait_pid_shim(0, true, false), Err(VprocError::UntrackedPid(0))));
        assert!(matches!(wait_pid_shim(-5, true, false), Err(VprocError::UntrackedPid(-5))));
    }
}
