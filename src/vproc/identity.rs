//! Process-wide identity bookkeeping used by job-control callers:
//! the shell's own synthetic pid, and the adoptive "kernel" pid that
//! stands in for a parent outside the vproc tree. Plain atomics, matching
//! the original's global scalars — no locking beyond what the atomics
//! themselves give, since these are independent last-write-wins values.

use std::sync::atomic::{AtomicI32, Ordering};

static SHELL_SELF_PID: AtomicI32 = AtomicI32::new(0);
static KERNEL_PID: AtomicI32 = AtomicI32::new(0);
static SESSION_KERNEL_PID: AtomicI32 = AtomicI32::new(0);

pub fn set_shell_self_pid(pid: i32) {
    SHELL_SELF_PID.store(pid, Ordering::Release);
}

pub fn shell_self_pid() -> i32 {
    SHELL_SELF_PID.load(Ordering::Acquire)
}

pub fn set_kernel_pid(pid: i32) {
    KERNEL_PID.store(pid, Ordering::Release);
}

pub fn kernel_pid() -> i32 {
    KERNEL_PID.load(Ordering::Acquire)
}

pub fn set_session_kernel_pid(pid: i32) {
    SESSION_KERNEL_PID.store(pid, Ordering::Release);
}

pub fn session_kernel_pid() -> i32 {
    SESSION_KERNEL_PID.load(Ordering::Acquire)
}
