//! The exported libc-replacement symbols: the actual `#[no_mangle] extern
//! "C"` entry points a preloaded build of this crate exposes. Each one asks
//! [`super::gate::should_intercept`] whether to take the vproc path at all,
//! then (for fd operations) whether a vproc is active on the calling
//! thread; signal operations additionally fall through to the real libc
//! when no vproc is active, per §4.5's "outside any active vproc, forward
//! to real libc".
//!
//! These are the seams a host "installs" by loading this crate as a
//! shared object (`LD_PRELOAD`/`DYLD_INSERT_LIBRARIES`-style); nothing
//! here is `unsafe` in the ordinary sense beyond what FFI requires, and
//! every raw pointer from the caller is validated before use.

use std::os::unix::io::RawFd;

use libc::{c_int, c_void, pid_t, size_t, ssize_t};
use nix::errno::Errno;

use crate::errors::VprocError;
use crate::signal::disposition::{default_for, Disposition, RawHandler, SigMask};
use crate::signal::How;
use crate::vproc::{self, shims as vshims};

use super::gate;
use super::raw;

fn set_errno(e: Errno) {
    Errno::set(e);
}

fn vproc_errno(e: &VprocError) -> Errno {
    e.to_errno()
}

/// Translates `fd` through the active vproc's fd table, else `None` if no
/// vproc is active (caller falls back to raw).
fn active_host_fd(fd: RawFd) -> Option<Result<RawFd, VprocError>> {
    vproc::current().map(|vp| vp.translate(fd))
}

// -- fd operations --------------------------------------------------------

#[no_mangle]
pub extern "C" fn vproc_read_shim(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    if !gate::should_intercept() {
        return unsafe { libc::read(fd, buf, count) };
    }
    let Some(vp) = vproc::current() else {
        return unsafe { libc::read(fd, buf, count) };
    };

    let user_buf = unsafe { std::slice::from_raw_parts_mut(buf as *mut u8, count) };

    // Cooperative-reader routing: only fd 0, only while this thread's
    // session stdio is active and its backing fd matches.
    if fd == 0 {
        if let Some(session) = crate::session::stdio::current() {
            if vp.translate(0).ok() == Some(session.stdin_host_fd) {
                return session.input.read(user_buf) as ssize_t;
            }
        }
    }

    match vp.translate(fd) {
        Ok(host_fd) => match raw::read(host_fd, user_buf) {
            Ok(n) => n as ssize_t,
            Err(e) => {
                set_errno(e);
                -1
            }
        },
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_write_shim(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    if !gate::should_intercept() {
        return unsafe { libc::write(fd, buf, count) };
    }
    let Some(host_fd) = active_host_fd(fd) else {
        return unsafe { libc::write(fd, buf, count) };
    };
    let user_buf = unsafe { std::slice::from_raw_parts(buf as *const u8, count) };
    match host_fd {
        Ok(host_fd) => match raw::write(host_fd, user_buf) {
            Ok(n) => n as ssize_t,
            Err(e) => {
                set_errno(e);
                -1
            }
        },
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_close_shim(fd: c_int) -> c_int {
    if !gate::should_intercept() {
        return unsafe { libc::close(fd) };
    }
    let Some(vp) = vproc::current() else {
        return unsafe { libc::close(fd) };
    };
    match vp.close(fd) {
        Ok(()) => 0,
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_dup_shim(fd: c_int) -> c_int {
    if !gate::should_intercept() {
        return unsafe { libc::dup(fd) };
    }
    let Some(vp) = vproc::current() else {
        return unsafe { libc::dup(fd) };
    };
    match vp.dup(fd) {
        Ok(new_fd) => new_fd,
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_dup2_shim(fd: c_int, target: c_int) -> c_int {
    if !gate::should_intercept() {
        return unsafe { libc::dup2(fd, target) };
    }
    let Some(vp) = vproc::current() else {
        return unsafe { libc::dup2(fd, target) };
    };
    match vp.dup2(fd, target) {
        Ok(new_fd) => new_fd,
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_pipe_shim(fds: *mut c_int) -> c_int {
    if !gate::should_intercept() {
        return unsafe { libc::pipe(fds) };
    }
    let Some(vp) = vproc::current() else {
        return unsafe { libc::pipe(fds) };
    };
    match vp.pipe() {
        Ok((r, w)) => {
            unsafe {
                *fds.offset(0) = r;
                *fds.offset(1) = w;
            }
            0
        }
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_open_shim(path: *const libc::c_char, oflag: c_int, mode: libc::mode_t) -> c_int {
    if !gate::should_intercept() {
        return unsafe { libc::open(path, oflag, mode) };
    }
    let Some(vp) = vproc::current() else {
        return unsafe { libc::open(path, oflag, mode) };
    };
    let cpath = unsafe { std::ffi::CStr::from_ptr(path) };
    let Ok(path_str) = cpath.to_str() else {
        set_errno(Errno::EINVAL);
        return -1;
    };
    match vp.open_at(path_str, nix::fcntl::OFlag::from_bits_truncate(oflag), nix::sys::stat::Mode::from_bits_truncate(mode)) {
        Ok(vfd) => vfd,
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_fstat_shim(fd: c_int, out: *mut libc::stat) -> c_int {
    if !gate::should_intercept() {
        return unsafe { libc::fstat(fd, out) };
    }
    let Some(vp) = vproc::current() else {
        return unsafe { libc::fstat(fd, out) };
    };
    match vp.translate(fd) {
        Ok(host_fd) => match raw::fstat(host_fd) {
            Ok(st) => {
                unsafe { *out = st };
                0
            }
            Err(e) => {
                set_errno(e);
                -1
            }
        },
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

/// Non-variadic `ioctl`: services `TIOCGWINSZ` from the active vproc's
/// winsize (or the virtual-tty fallback's synthesized default when no
/// vproc is active but the fallback is enabled); everything else passes
/// through to the host fd the vfd translates to.
#[no_mangle]
pub extern "C" fn vproc_ioctl_shim(fd: c_int, request: libc::c_ulong, argp: *mut c_void) -> c_int {
    if !gate::should_intercept() {
        return unsafe { libc::ioctl(fd, request as _, argp) };
    }

    if request == libc::TIOCGWINSZ as libc::c_ulong && !argp.is_null() {
        if let Some(vp) = vproc::current() {
            let ws = vp.winsize();
            unsafe {
                (*(argp as *mut libc::winsize)).ws_col = ws.cols;
                (*(argp as *mut libc::winsize)).ws_row = ws.rows;
            }
            return 0;
        }
        if super::vtty::is_enabled() {
            let ws = super::vtty::synthesize_winsize();
            unsafe {
                (*(argp as *mut libc::winsize)).ws_col = ws.cols;
                (*(argp as *mut libc::winsize)).ws_row = ws.rows;
            }
            return 0;
        }
    }

    let Some(vp) = vproc::current() else {
        return unsafe { libc::ioctl(fd, request as _, argp) };
    };
    match vp.translate(fd) {
        Ok(host_fd) => match raw::ioctl(host_fd, request, argp) {
            Ok(ret) => ret,
            Err(e) => {
                set_errno(e);
                -1
            }
        },
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_isatty_shim(fd: c_int) -> c_int {
    if super::vtty::isatty_override(fd) {
        return 1;
    }
    unsafe { libc::isatty(fd) }
}

// -- process-identity / wait / kill ---------------------------------------

#[no_mangle]
pub extern "C" fn vproc_getpid_shim() -> pid_t {
    if gate::should_intercept() {
        if let Some(pid) = vshims::getpid_shim() {
            return pid;
        }
    }
    raw::getpid()
}

#[no_mangle]
pub extern "C" fn vproc_kill_shim(pid: pid_t, sig: c_int) -> c_int {
    if gate::should_intercept() {
        match vshims::kill_shim(pid, sig) {
            Ok(()) => return 0,
            Err(VprocError::UntrackedPid(_)) => {}
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    match raw::kill(pid, sig) {
        Ok(()) => 0,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_waitpid_shim(pid: pid_t, status: *mut c_int, options: c_int) -> pid_t {
    if gate::should_intercept() {
        let wnohang = options & libc::WNOHANG != 0;
        let wuntraced = options & libc::WUNTRACED != 0;
        match vshims::wait_pid_shim(pid, wnohang, wuntraced) {
            Ok((got_pid, encoded)) => {
                if !status.is_null() {
                    unsafe { *status = encoded };
                }
                return got_pid;
            }
            Err(VprocError::UntrackedPid(_)) => {}
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    match raw::waitpid(pid, options) {
        Ok((got_pid, encoded)) => {
            if !status.is_null() {
                unsafe { *status = encoded };
            }
            got_pid
        }
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_setpgid_shim(pid: pid_t, pgid: pid_t) -> c_int {
    if gate::should_intercept() {
        match vshims::set_pgid_shim(pid, pgid) {
            Ok(()) => return 0,
            Err(VprocError::UntrackedPid(_)) => {}
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    match raw::setpgid(pid, pgid) {
        Ok(()) => 0,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_setsid_shim() -> pid_t {
    if gate::should_intercept() {
        match vshims::setsid_shim() {
            Ok(sid) => return sid,
            Err(VprocError::UntrackedPid(_)) => {}
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    match raw::setsid() {
        Ok(sid) => sid,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_getsid_shim(pid: pid_t) -> pid_t {
    if gate::should_intercept() {
        match vshims::get_sid_shim(pid) {
            Ok(sid) => return sid,
            Err(VprocError::UntrackedPid(_)) => {}
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    match raw::getsid(pid) {
        Ok(sid) => sid,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_tcgetpgrp_shim(fd: c_int) -> pid_t {
    if gate::should_intercept() && vproc::current().is_some() {
        match vshims::tcgetpgrp_shim() {
            Ok(pgid) => return pgid,
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    match raw::tcgetpgrp(fd) {
        Ok(pgid) => pgid,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_tcsetpgrp_shim(fd: c_int, pgrp: pid_t) -> c_int {
    if gate::should_intercept() && vproc::current().is_some() {
        match vshims::tcsetpgrp_shim(pgrp) {
            Ok(()) => return 0,
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    match raw::tcsetpgrp(fd, pgrp) {
        Ok(()) => 0,
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

// -- signal shims -----------------------------------------------------

fn sigset_to_mask(set: *const libc::sigset_t) -> SigMask {
    let mut mask = SigMask::empty();
    if set.is_null() {
        return mask;
    }
    for sig in 1..=64 {
        let member = unsafe { libc::sigismember(set, sig) };
        if member == 1 {
            mask.add(sig);
        }
    }
    mask
}

fn mask_to_sigset(mask: SigMask) -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for sig in 1..=64 {
            if mask.has(sig) {
                libc::sigaddset(&mut set, sig);
            }
        }
        set
    }
}

fn disposition_from_sigaction(sig: c_int, act: &libc::sigaction) -> Disposition {
    let handler = act.sa_sigaction;
    if handler == libc::SIG_DFL {
        default_for(sig)
    } else if handler == libc::SIG_IGN {
        Disposition::Ignore
    } else {
        let f: RawHandler = unsafe { std::mem::transmute(handler) };
        Disposition::Handler(f)
    }
}

fn disposition_to_sigaction(d: Disposition) -> libc::sigaction {
    let mut act: libc::sigaction = unsafe { std::mem::zeroed() };
    act.sa_sigaction = match d {
        Disposition::Handler(f) => f as usize,
        Disposition::Ignore | Disposition::DefaultIgnore => libc::SIG_IGN,
        Disposition::DefaultTerminate | Disposition::DefaultCore => libc::SIG_DFL,
    };
    act
}

#[no_mangle]
pub extern "C" fn vproc_sigaction_shim(sig: c_int, act: *const libc::sigaction, old: *mut libc::sigaction) -> c_int {
    if gate::should_intercept() && vproc::current().is_some() {
        let new = if act.is_null() { None } else { Some(disposition_from_sigaction(sig, unsafe { &*act })) };
        match vshims::sigaction_shim(sig, new) {
            Ok(prev) => {
                if !old.is_null() {
                    unsafe { *old = disposition_to_sigaction(prev) };
                }
                return 0;
            }
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    raw::sigaction(sig, act, old).map(|_| 0).unwrap_or_else(|e| {
        set_errno(e);
        -1
    })
}

fn sigprocmask_common(how: c_int, set: *const libc::sigset_t, old: *mut libc::sigset_t) -> c_int {
    let how = match how {
        libc::SIG_BLOCK => How::Block,
        libc::SIG_UNBLOCK => How::Unblock,
        libc::SIG_SETMASK => How::SetMask,
        _ => {
            set_errno(Errno::EINVAL);
            return -1;
        }
    };
    let new_mask = if set.is_null() { None } else { Some(sigset_to_mask(set)) };
    match vshims::sigprocmask_shim(how, new_mask) {
        Ok(prev) => {
            if !old.is_null() {
                unsafe { *old = mask_to_sigset(prev) };
            }
            0
        }
        Err(e) => {
            set_errno(vproc_errno(&e));
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn vproc_sigprocmask_shim(how: c_int, set: *const libc::sigset_t, old: *mut libc::sigset_t) -> c_int {
    if gate::should_intercept() && vproc::current().is_some() {
        return sigprocmask_common(how, set, old);
    }
    raw::sigprocmask(how, set, old).map(|_| 0).unwrap_or_else(|e| {
        set_errno(e);
        -1
    })
}

/// `pthread_sigmask` shares the exact per-vproc blocked-mask semantics as
/// `sigprocmask` here — both ultimately serialize through the same
/// task-table entry for the calling vproc's (single, cooperative) "thread".
#[no_mangle]
pub extern "C" fn vproc_pthread_sigmask_shim(how: c_int, set: *const libc::sigset_t, old: *mut libc::sigset_t) -> c_int {
    if gate::should_intercept() && vproc::current().is_some() {
        return sigprocmask_common(how, set, old);
    }
    raw::sigprocmask(how, set, old).map(|_| 0).unwrap_or_else(|e| {
        set_errno(e);
        -1
    })
}

#[no_mangle]
pub extern "C" fn vproc_sigpending_shim(set: *mut libc::sigset_t) -> c_int {
    if gate::should_intercept() && vproc::current().is_some() {
        match vshims::sigpending_shim() {
            Ok(mask) => {
                if !set.is_null() {
                    unsafe { *set = mask_to_sigset(mask) };
                }
                return 0;
            }
            Err(e) => {
                set_errno(vproc_errno(&e));
                return -1;
            }
        }
    }
    raw::sigpending(set).map(|_| 0).unwrap_or_else(|e| {
        set_errno(e);
        -1
    })
}

#[no_mangle]
pub extern "C" fn vproc_sigsuspend_shim(mask: *const libc::sigset_t) -> c_int {
    if gate::should_intercept() && vproc::current().is_some() {
        let mask = sigset_to_mask(mask);
        return match vshims::sigsuspend_shim(mask) {
            Ok(()) => -1, // sigsuspend always returns -1/EINTR on the real syscall's contract
            Err(e) => {
                set_errno(vproc_errno(&e));
                -1
            }
        };
    }
    let _ = raw::sigsuspend(mask);
    -1
}

#[no_mangle]
pub extern "C" fn vproc_raise_shim(sig: c_int) -> c_int {
    if gate::should_intercept() && vproc::current().is_some() {
        return match vshims::raise_shim(sig) {
            Ok(()) => 0,
            Err(e) => {
                set_errno(vproc_errno(&e));
                -1
            }
        };
    }
    raw::raise(sig).map(|_| 0).unwrap_or_else(|e| {
        set_errno(e);
        -1
    })
}

#[no_mangle]
pub extern "C" fn vproc_signal_shim(sig: c_int, handler: libc::sighandler_t) -> libc::sighandler_t {
    if gate::should_intercept() && vproc::current().is_some() {
        let new_handler = if handler == libc::SIG_IGN || handler == libc::SIG_DFL {
            None
        } else {
            Some(unsafe { std::mem::transmute::<libc::sighandler_t, RawHandler>(handler) })
        };
        if let Ok(prev) = vshims::signal_shim(sig, new_handler) {
            return disposition_to_sigaction(prev).sa_sigaction;
        }
    }
    unsafe { libc::signal(sig, handler) }
}

// -- pthread_create --------------------------------------------------------

struct TrampolineCtx {
    inherited: Option<std::sync::Arc<vproc::VProc>>,
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
}

unsafe impl Send for TrampolineCtx {}

extern "C" fn trampoline(ctx: *mut c_void) -> *mut c_void {
    let ctx = unsafe { Box::from_raw(ctx as *mut TrampolineCtx) };
    if let Some(vp) = ctx.inherited.clone() {
        vproc::activate(vp);
    }
    (ctx.start_routine)(ctx.arg)
}

/// Whether `f` looks like application code rather than something living
/// inside this crate's own image — determined the same way the resolver
/// rejects self-bound symbols, via `dladdr` image comparison. Threads this
/// crate spawns internally must not recurse back through activation
/// inheritance.
fn originates_outside_self(f: extern "C" fn(*mut c_void) -> *mut c_void) -> bool {
    unsafe {
        let mut info: libc::Dl_info = std::mem::zeroed();
        if libc::dladdr(f as *const c_void, &mut info) == 0 || info.dli_fbase.is_null() {
            return true;
        }
        let mut self_info: libc::Dl_info = std::mem::zeroed();
        let anchor = originates_outside_self as *const () as *mut c_void;
        if libc::dladdr(anchor, &mut self_info) == 0 || self_info.dli_fbase.is_null() {
            return true;
        }
        info.dli_fbase != self_info.dli_fbase
    }
}

#[no_mangle]
pub extern "C" fn vproc_pthread_create_shim(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> c_int {
    if !gate::should_intercept() || !originates_outside_self(start_routine) {
        return raw::pthread_create(thread, attr, start_routine, arg);
    }

    let ctx = Box::new(TrampolineCtx {
        inherited: vproc::current(),
        start_routine,
        arg,
    });
    raw::pthread_create(thread, attr, trampoline, Box::into_raw(ctx) as *mut c_void)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigset_round_trips_through_mask() {
        let mut native: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut native);
            libc::sigaddset(&mut native, libc::SIGUSR1);
            libc::sigaddset(&mut native, libc::SIGTERM);
        }
        let mask = sigset_to_mask(&native);
        assert!(mask.has(libc::SIGUSR1));
        assert!(mask.has(libc::SIGTERM));
        assert!(!mask.has(libc::SIGINT));

        let back = mask_to_sigset(mask);
        assert_eq!(unsafe { libc::sigismember(&back, libc::SIGUSR1) }, 1);
    }
}
