//! Process-wide registry of synthetic pids: parent/pgid/sid/fg_pgid,
//! exit/stopped status, and per-task signal bookkeeping. Ported from
//! `VProcTaskTable`/`gVProcTasks` in `vproc.c`, including the wait/kill
//! protocol's state machine in §4.3.

use std::sync::atomic::{AtomicI32, Ordering};

use libc::c_int;
use nix::errno::Errno;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::errors::VprocError;
use crate::signal::disposition::{default_for, is_continue_signal, is_stop_signal, Disposition, DispositionTable, SigMask};

/// Seed matching the original's `gNextSyntheticPid` start value.
const FIRST_SYNTHETIC_PID: i32 = 1000;

static NEXT_PID: AtomicI32 = AtomicI32::new(FIRST_SYNTHETIC_PID);

/// Advances the pid counter past `hint` if necessary, so a caller-supplied
/// `pid_hint` can never collide with a future allocation.
fn maybe_advance_past(hint: i32) {
    loop {
        let current = NEXT_PID.load(Ordering::Acquire);
        if hint < current {
            return;
        }
        if NEXT_PID
            .compare_exchange_weak(current, hint + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }
}

fn next_pid() -> i32 {
    NEXT_PID.fetch_add(1, Ordering::AcqRel)
}

#[derive(Clone)]
pub struct TaskEntry {
    pub pid: i32,
    pub thread_id: Option<libc::pthread_t>,
    pub parent_pid: i32,
    pub pgid: i32,
    pub sid: i32,
    pub fg_pgid: Option<i32>,
    pub exited: bool,
    pub stopped: bool,
    pub zombie: bool,
    pub status: i32,
    pub stop_signo: i32,
    pub job_id: i32,
    pub label: Option<String>,
    pub sigchld_pending: bool,
    pub sigchld_blocked: bool,
    pub rusage_utime: i64,
    pub rusage_stime: i64,
    pub blocked: SigMask,
    pub pending: SigMask,
    pub dispositions: DispositionTable,
}

impl TaskEntry {
    fn free() -> Self {
        TaskEntry {
            pid: 0,
            thread_id: None,
            parent_pid: 0,
            pgid: 0,
            sid: 0,
            fg_pgid: None,
            exited: false,
            stopped: false,
            zombie: false,
            status: 0,
            stop_signo: 0,
            job_id: 0,
            label: None,
            sigchld_pending: false,
            sigchld_blocked: false,
            rusage_utime: 0,
            rusage_stime: 0,
            blocked: SigMask::empty(),
            pending: SigMask::empty(),
            dispositions: DispositionTable::new(),
        }
    }

    fn is_free(&self) -> bool {
        self.pid == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub pid: i32,
    pub parent_pid: i32,
    pub pgid: i32,
    pub sid: i32,
    pub fg_pgid: Option<i32>,
    pub exited: bool,
    pub stopped: bool,
    pub zombie: bool,
    pub status: i32,
    pub stop_signo: i32,
    pub job_id: i32,
}

/// `W_EXITCODE`-equivalent status encoding for a normal exit.
pub fn w_exitcode(code: i32) -> i32 {
    (code & 0xff) << 8
}

/// `W_STOPCODE`-equivalent status encoding for a stop.
pub fn w_stopcode(sig: i32) -> i32 {
    ((sig & 0xff) << 8) | 0x7f
}

pub struct TaskTable {
    state: Mutex<Vec<TaskEntry>>,
    cv: Condvar,
}

/// Implemented by callers that can attempt to unblock a target thread's
/// blocking host syscalls via thread-directed signaling + cancellation.
/// Modeled as a trait (rather than calling `pthread_kill`/`pthread_cancel`
/// directly here) so kill/wait state-machine tests don't need a real,
/// cooperating OS thread to exercise the synthetic-exit path.
pub trait ThreadDirected {
    fn deliver(&self, tid: libc::pthread_t, sig: c_int);
}

pub struct RealThreadDirected;

impl ThreadDirected for RealThreadDirected {
    fn deliver(&self, tid: libc::pthread_t, sig: c_int) {
        unsafe {
            let _ = libc::pthread_kill(tid, sig);
            let _ = libc::pthread_cancel(tid);
        }
    }
}

impl TaskTable {
    fn new() -> Self {
        TaskTable {
            state: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        }
    }

    /// Process-wide singleton, matching the original's single global
    /// `gVProcTasks` — there is exactly one task table per host process.
    pub fn global() -> &'static TaskTable {
        static TABLE: Lazy<TaskTable> = Lazy::new(TaskTable::new);
        &TABLE
    }

    fn find_locked(state: &[TaskEntry], pid: i32) -> Option<usize> {
        state.iter().position(|e| e.pid == pid)
    }

    /// Idempotent: reuses an existing entry for `pid` if present (the
    /// `pid_hint` reservation path), otherwise reuses a free slot or grows.
    fn ensure_slot_locked(state: &mut Vec<TaskEntry>, pid: i32) -> usize {
        if let Some(idx) = Self::find_locked(state, pid) {
            return idx;
        }
        if let Some(idx) = state.iter().position(TaskEntry::is_free) {
            state[idx] = TaskEntry { pid, ..TaskEntry::free() };
            return idx;
        }
        state.push(TaskEntry { pid, ..TaskEntry::free() });
        state.len() - 1
    }

    /// Reserves a pid (advancing the counter past `hint` if given) and
    /// ensures a task-table slot exists for it without marking it as
    /// belonging to any particular vproc yet.
    pub fn reserve_pid(&self, hint: Option<i32>) -> i32 {
        if let Some(hint) = hint {
            maybe_advance_past(hint);
        }
        let pid = next_pid();
        let mut state = self.state.lock();
        Self::ensure_slot_locked(&mut state, pid);
        pid
    }

    /// Creates a fresh task entry for `pid`, parented to `parent_pid`. The
    /// entry inherits its parent's pgid/sid, same as a real `fork()`'d
    /// child — it only becomes a group/session leader through an explicit
    /// `setpgid`/`setsid` call.
    pub fn create(&self, pid: i32, parent_pid: i32) {
        let mut state = self.state.lock();
        let idx = Self::ensure_slot_locked(&mut state, pid);
        state[idx].parent_pid = parent_pid;
        state[idx].pgid = parent_pid;
        state[idx].sid = parent_pid;
        state[idx].exited = false;
        state[idx].stopped = false;
    }

    pub fn register_thread(&self, pid: i32, tid: libc::pthread_t) {
        let mut state = self.state.lock();
        if let Some(idx) = Self::find_locked(&state, pid) {
            state[idx].thread_id = Some(tid);
        }
    }

    pub fn set_job_id(&self, pid: i32, job_id: i32) {
        let mut state = self.state.lock();
        if let Some(idx) = Self::find_locked(&state, pid) {
            state[idx].job_id = job_id;
        }
    }

    pub fn get_job_id(&self, pid: i32) -> Option<i32> {
        let state = self.state.lock();
        Self::find_locked(&state, pid).map(|i| state[i].job_id)
    }

    pub fn set_command_label(&self, pid: i32, label: impl Into<String>) {
        let mut state = self.state.lock();
        if let Some(idx) = Self::find_locked(&state, pid) {
            let mut label = label.into();
            label.truncate(63);
            state[idx].label = Some(label);
        }
    }

    pub fn get_command_label(&self, pid: i32) -> Option<String> {
        let state = self.state.lock();
        Self::find_locked(&state, pid).and_then(|i| state[i].label.clone())
    }

    /// Removes a task entry outright without requiring a `waitpid` first.
    pub fn discard(&self, pid: i32) {
        let mut state = self.state.lock();
        if let Some(idx) = Self::find_locked(&state, pid) {
            state[idx] = TaskEntry::free();
        }
    }

    /// Marks every task in session `sid` as exited with `status`.
    ///
    /// `status` here (like [`mark_exit`](Self::mark_exit)'s `code`) is the
    /// raw exit code, *not* yet wait-status encoded — [`waitpid`](Self::waitpid)
    /// applies `W_EXITCODE` once, at retrieval, so every path that marks a
    /// task exited (normal exit, signal-synthesized exit, session
    /// termination) stores the same raw-code shape.
    pub fn terminate_session(&self, sid: i32, status: i32) {
        let mut state = self.state.lock();
        for entry in state.iter_mut() {
            if !entry.is_free() && entry.sid == sid {
                entry.exited = true;
                entry.stopped = false;
                entry.status = status;
            }
        }
        self.cv.notify_all();
    }

    pub fn mark_exit(&self, pid: i32, code: i32) {
        let mut state = self.state.lock();
        if let Some(idx) = Self::find_locked(&state, pid) {
            state[idx].exited = true;
            state[idx].stopped = false;
            state[idx].status = code;
            trace!(pid, code, "task marked exited");
        }
        self.cv.notify_all();
    }

    fn apply_kill_locked(entry: &mut TaskEntry, sig: c_int, threaded: &dyn ThreadDirected) {
        if is_stop_signal(sig) {
            entry.stopped = true;
            entry.stop_signo = sig;
            entry.exited = false;
        } else if is_continue_signal(sig) {
            entry.stopped = false;
            entry.stop_signo = 0;
        } else {
            entry.status = 128 + sig;
            entry.exited = true;
            entry.stopped = false;
            if let Some(tid) = entry.thread_id {
                threaded.deliver(tid, sig);
            }
        }
    }

    /// `kill(pid, sig)` for `pid > 0`. Returns `Err(UntrackedPid)` when the
    /// pid isn't in the table, signaling the caller to fall back to a real
    /// host `kill`.
    pub fn kill(&self, pid: i32, sig: c_int, threaded: &dyn ThreadDirected) -> Result<(), VprocError> {
        let mut state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        Self::apply_kill_locked(&mut state[idx], sig, threaded);
        debug!(pid, sig, "synthetic kill applied");
        drop(state);
        self.cv.notify_all();
        Ok(())
    }

    /// `kill(-pgid, sig)`: applies to every tracked task whose `pgid`
    /// matches. Never falls back (an empty/untracked group is simply a
    /// no-op, matching "no such process" being meaningless for pgid kill
    /// in this runtime).
    pub fn kill_pgrp(&self, pgid: i32, sig: c_int, threaded: &dyn ThreadDirected) {
        let mut state = self.state.lock();
        for entry in state.iter_mut() {
            if !entry.is_free() && entry.pgid == pgid {
                Self::apply_kill_locked(entry, sig, threaded);
            }
        }
        drop(state);
        self.cv.notify_all();
    }

    /// `waitpid(pid, options)`. `wnohang`/`wuntraced` mirror the `WNOHANG`/
    /// `WUNTRACED` flags. Returns `(0, 0)` immediately for a live,
    /// non-stopped task under `WNOHANG`.
    pub fn waitpid(&self, pid: i32, wnohang: bool, wuntraced: bool) -> Result<(i32, i32), VprocError> {
        let mut state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;

        loop {
            let done = state[idx].exited || (wuntraced && state[idx].stopped);
            if done {
                break;
            }
            if wnohang {
                return Ok((0, 0));
            }
            self.cv.wait(&mut state);
        }

        let status = if state[idx].exited {
            let s = w_exitcode(state[idx].status);
            state[idx] = TaskEntry::free();
            s
        } else {
            w_stopcode(state[idx].stop_signo)
        };

        Ok((pid, status))
    }

    pub fn snapshot(&self) -> Vec<Snapshot> {
        let state = self.state.lock();
        state
            .iter()
            .filter(|e| !e.is_free())
            .map(|e| Snapshot {
                pid: e.pid,
                parent_pid: e.parent_pid,
                pgid: e.pgid,
                sid: e.sid,
                fg_pgid: e.fg_pgid,
                exited: e.exited,
                stopped: e.stopped,
                zombie: e.zombie,
                status: e.status,
                stop_signo: e.stop_signo,
                job_id: e.job_id,
            })
            .collect()
    }

    pub fn get_pgid(&self, pid: i32) -> Result<i32, VprocError> {
        let state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        Ok(state[idx].pgid)
    }

    pub fn get_sid(&self, pid: i32) -> Result<i32, VprocError> {
        let state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        Ok(state[idx].sid)
    }

    /// `setpgid(pid, pgid)`. Fails with `EPERM` when `pid` is itself a
    /// session leader (`sid == pid`), matching the testable property.
    pub fn setpgid(&self, pid: i32, pgid: i32) -> Result<(), VprocError> {
        let mut state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        if state[idx].sid == state[idx].pid {
            return Err(VprocError::Errno(Errno::EPERM));
        }
        let new_pgid = if pgid == 0 { pid } else { pgid };
        state[idx].pgid = new_pgid;
        Ok(())
    }

    /// `setsid(pid)`. Fails with `EPERM` when `pid` is already a
    /// process-group leader (`pgid == pid`).
    pub fn setsid(&self, pid: i32) -> Result<i32, VprocError> {
        let mut state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        if state[idx].pgid == state[idx].pid {
            return Err(VprocError::Errno(Errno::EPERM));
        }
        state[idx].sid = pid;
        state[idx].pgid = pid;
        state[idx].fg_pgid = Some(pid);
        Ok(pid)
    }

    pub fn set_foreground_pgid(&self, sid: i32, pgid: i32) -> Result<(), VprocError> {
        let mut state = self.state.lock();
        let idx = Self::find_locked(&state, sid).ok_or(VprocError::UntrackedPid(sid))?;
        state[idx].fg_pgid = Some(pgid);
        Ok(())
    }

    pub fn get_foreground_pgid(&self, sid: i32) -> Result<i32, VprocError> {
        let state = self.state.lock();
        let idx = Self::find_locked(&state, sid).ok_or(VprocError::UntrackedPid(sid))?;
        state[idx].fg_pgid.ok_or(VprocError::Errno(Errno::EINVAL))
    }

    pub fn set_rusage(&self, pid: i32, utime: i64, stime: i64) {
        let mut state = self.state.lock();
        if let Some(idx) = Self::find_locked(&state, pid) {
            state[idx].rusage_utime = utime;
            state[idx].rusage_stime = stime;
        }
    }

    // -- signal bookkeeping, used by `crate::signal::shim` -------------

    pub fn with_entry_mut<R>(&self, pid: i32, f: impl FnOnce(&mut TaskEntry) -> R) -> Result<R, VprocError> {
        let mut state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        Ok(f(&mut state[idx]))
    }

    pub fn with_entry<R>(&self, pid: i32, f: impl FnOnce(&TaskEntry) -> R) -> Result<R, VprocError> {
        let state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        Ok(f(&state[idx]))
    }

    /// Blocks the calling thread on the task-table condvar until
    /// `predicate` holds for `pid`'s entry, used by `sigsuspend`.
    pub fn wait_until(&self, pid: i32, mut predicate: impl FnMut(&TaskEntry) -> bool) -> Result<(), VprocError> {
        let mut state = self.state.lock();
        let idx = Self::find_locked(&state, pid).ok_or(VprocError::UntrackedPid(pid))?;
        while !predicate(&state[idx]) {
            self.cv.wait(&mut state);
        }
        Ok(())
    }

    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    #[cfg(test)]
    fn lock_for_test(&self) -> MutexGuard<'_, Vec<TaskEntry>> {
        self.state.lock()
    }
}

/// Seeds a fresh entry's disposition table entry, exposed so
/// `signal::shim` can reset a single signal to its POSIX default (`signal
/// (sig, SIG_DFL)` equivalent) without recomputing the whole table.
pub fn default_disposition(sig: c_int) -> Disposition {
    default_for(sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_table() -> TaskTable {
        TaskTable::new()
    }

    #[test]
    fn create_then_kill_stop_then_continue_then_exit() {
        let table = fresh_table();
        table.create(42, 1);

        table.kill(42, libc::SIGTSTP, &RealThreadDirected).unwrap();
        let (pid, status) = table.waitpid(42, false, true).unwrap();
        assert_eq!(pid, 42);
        assert!((status & 0x7f) == 0x7f);
        assert_eq!((status >> 8) & 0xff, libc::SIGTSTP);

        table.kill(42, libc::SIGCONT, &RealThreadDirected).unwrap();
        table.mark_exit(42, 7);
        let (pid, status) = table.waitpid(42, false, false).unwrap();
        assert_eq!(pid, 42);
        assert_eq!((status >> 8) & 0xff, 7);
    }

    #[test]
    fn kill_term_synthesizes_signaled_exit() {
        let table = fresh_table();
        table.create(43, 1);
        table.kill(43, libc::SIGTERM, &RealThreadDirected).unwrap();
        let (pid, status) = table.waitpid(43, false, false).unwrap();
        assert_eq!(pid, 43);
        assert_eq!(status >> 8, 128 + libc::SIGTERM);
    }

    #[test]
    fn wnohang_returns_immediately_when_alive() {
        let table = fresh_table();
        table.create(44, 1);
        assert_eq!(table.waitpid(44, true, false).unwrap(), (0, 0));
    }

    #[test]
    fn setpgid_rejects_session_leader() {
        let table = fresh_table();
        table.create(45, 1);
        table.setsid(45).unwrap();
        assert!(matches!(table.setpgid(45, 45), Err(VprocError::Errno(Errno::EPERM))));
    }

    #[test]
    fn setsid_then_getsid_matches_getpgrp_and_getpid() {
        let table = fresh_table();
        table.create(46, 1);
        let sid = table.setsid(46).unwrap();
        assert_eq!(sid, 46);
        assert_eq!(table.get_sid(46).unwrap(), 46);
        assert_eq!(table.get_pgid(46).unwrap(), 46);
    }

    #[test]
    fn foreground_pgid_round_trips() {
        let table = fresh_table();
        table.create(47, 1);
        table.setsid(47).unwrap();
        table.set_foreground_pgid(47, 99).unwrap();
        assert_eq!(table.get_foreground_pgid(47).unwrap(), 99);
        let snap = table.snapshot();
        let leader = snap.iter().find(|s| s.pid == 47).unwrap();
        assert_eq!(leader.fg_pgid, Some(99));
    }

    #[test]
    fn pgroup_kill_stops_all_members() {
        let table = fresh_table();
        table.create(50, 1);
        table.create(51, 1);
        table.setpgid(50, 50).unwrap();
        table.setpgid(51, 50).unwrap();

        table.kill_pgrp(50, libc::SIGTSTP, &RealThreadDirected);

        for pid in [50, 51] {
            let (got_pid, status) = table.waitpid(pid, false, true).unwrap();
            assert_eq!(got_pid, pid);
            assert_eq!((status >> 8) & 0xff, libc::SIGTSTP);
        }
    }

    #[test]
    fn exited_entry_is_recycled_stopped_entry_is_not() {
        let table = fresh_table();
        table.create(60, 1);
        table.mark_exit(60, 0);
        table.waitpid(60, false, false).unwrap();
        assert!(table.lock_for_test().iter().all(|e| e.pid != 60));

        table.create(61, 1);
        table.kill(61, libc::SIGTSTP, &RealThreadDirected).unwrap();
        table.waitpid(61, false, true).unwrap();
        assert!(table.lock_for_test().iter().any(|e| e.pid == 61));
    }

    #[test]
    fn snapshot_lists_only_live_tasks() {
        let table = fresh_table();
        table.create(70, 1);
        table.create(71, 1);
        assert_eq!(table.snapshot().iter().filter(|s| s.pid == 70 || s.pid == 71).count(), 2);

        table.mark_exit(70, 0);
        table.waitpid(70, false, false).unwrap();
        table.mark_exit(71, 0);
        table.waitpid(71, false, false).unwrap();

        assert_eq!(table.snapshot().iter().filter(|s| s.pid == 70 || s.pid == 71).count(), 0);
    }
}
