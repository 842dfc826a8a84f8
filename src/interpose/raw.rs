//! Cached real-libc function pointers, resolved once via
//! [`super::resolver::resolve`]. Every piece of this crate's *own* code
//! that needs to perform a host read/write/dup/dup2/close/pipe/open —
//! including internal bookkeeping like the fd table, not just the
//! exported shim entry points — must go through here rather than calling
//! `nix`/`libc` directly.
//!
//! The reason is the same self-recursion hazard `resolver` guards
//! against: when this crate is loaded as a preloaded shared object that
//! exports symbols named `read`/`write`/`dup`/… (see [`super::shims`]),
//! a call to `libc::dup` from anywhere *inside this same image* would
//! dynamically re-resolve to our own exported `dup` and recurse forever.
//! Routing internal calls through these cached, `RTLD_NEXT`-resolved
//! pointers instead keeps them talking to the real libc underneath us,
//! exactly as the original's raw wrappers do.

use std::os::unix::io::RawFd;

use libc::{c_int, c_void, off_t, pid_t, size_t, ssize_t};
use nix::errno::Errno;
use once_cell::sync::Lazy;

use super::resolver::resolve;
use crate::errors::err;

type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type WriteFn = unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type DupFn = unsafe extern "C" fn(c_int) -> c_int;
type Dup2Fn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type PipeFn = unsafe extern "C" fn(*mut c_int) -> c_int;
type LseekFn = unsafe extern "C" fn(c_int, off_t, c_int) -> off_t;
type OpenFn = unsafe extern "C" fn(*const libc::c_char, c_int, libc::mode_t) -> c_int;
type FstatFn = unsafe extern "C" fn(c_int, *mut libc::stat) -> c_int;
type IoctlFn = unsafe extern "C" fn(c_int, libc::c_ulong, *mut c_void) -> c_int;
type GetpidFn = unsafe extern "C" fn() -> pid_t;
type KillFn = unsafe extern "C" fn(pid_t, c_int) -> c_int;
type WaitpidFn = unsafe extern "C" fn(pid_t, *mut c_int, c_int) -> pid_t;
type SetpgidFn = unsafe extern "C" fn(pid_t, pid_t) -> c_int;
type GetpgidFn = unsafe extern "C" fn(pid_t) -> pid_t;
type SetsidFn = unsafe extern "C" fn() -> pid_t;
type GetsidFn = unsafe extern "C" fn(pid_t) -> pid_t;
type TcgetpgrpFn = unsafe extern "C" fn(c_int) -> pid_t;
type TcsetpgrpFn = unsafe extern "C" fn(c_int, pid_t) -> c_int;
type SigactionFn = unsafe extern "C" fn(c_int, *const libc::sigaction, *mut libc::sigaction) -> c_int;
type SigprocmaskFn = unsafe extern "C" fn(c_int, *const libc::sigset_t, *mut libc::sigset_t) -> c_int;
type SigpendingFn = unsafe extern "C" fn(*mut libc::sigset_t) -> c_int;
type SigsuspendFn = unsafe extern "C" fn(*const libc::sigset_t) -> c_int;
type RaiseFn = unsafe extern "C" fn(c_int) -> c_int;
type PthreadCreateFn = unsafe extern "C" fn(
    *mut libc::pthread_t,
    *const libc::pthread_attr_t,
    extern "C" fn(*mut c_void) -> *mut c_void,
    *mut c_void,
) -> c_int;

struct RawTable {
    read: ReadFn,
    write: WriteFn,
    close: CloseFn,
    dup: DupFn,
    dup2: Dup2Fn,
    pipe: PipeFn,
    lseek: LseekFn,
    open: OpenFn,
    fstat: FstatFn,
    ioctl: IoctlFn,
    getpid: GetpidFn,
    kill: KillFn,
    waitpid: WaitpidFn,
    setpgid: SetpgidFn,
    getpgid: GetpgidFn,
    setsid: SetsidFn,
    getsid: GetsidFn,
    tcgetpgrp: TcgetpgrpFn,
    tcsetpgrp: TcsetpgrpFn,
    sigaction: SigactionFn,
    sigprocmask: SigprocmaskFn,
    sigpending: SigpendingFn,
    sigsuspend: SigsuspendFn,
    raise_: RaiseFn,
    pthread_create: PthreadCreateFn,
}

fn resolve_or_libc<T: Copy>(name: &str, fallback: T) -> T {
    match resolve(name) {
        Some(ptr) => unsafe { std::mem::transmute_copy(&ptr) },
        None => fallback,
    }
}

/// `libc::ioctl` is variadic and can't be named as a plain function pointer
/// of [`IoctlFn`]'s shape; this non-variadic shim is the fallback used when
/// `dlsym` can't resolve a real `ioctl` (which should never actually
/// happen — it exists in every libc).
extern "C" fn ioctl_fallback(fd: c_int, request: libc::c_ulong, argp: *mut c_void) -> c_int {
    unsafe { libc::ioctl(fd, request as _, argp) }
}

/// `libc::open` is likewise variadic (the `mode` argument is only
/// meaningful with `O_CREAT`); same rationale as [`ioctl_fallback`].
extern "C" fn open_fallback(path: *const libc::c_char, oflag: c_int, mode: libc::mode_t) -> c_int {
    unsafe { libc::open(path, oflag, mode) }
}

fn table() -> &'static RawTable {
    static TABLE: Lazy<RawTable> = Lazy::new(|| RawTable {
        read: resolve_or_libc("read", libc::read as ReadFn),
        write: resolve_or_libc("write", libc::write as WriteFn),
        close: resolve_or_libc("close", libc::close as CloseFn),
        dup: resolve_or_libc("dup", libc::dup as DupFn),
        dup2: resolve_or_libc("dup2", libc::dup2 as Dup2Fn),
        pipe: resolve_or_libc("pipe", libc::pipe as PipeFn),
        lseek: resolve_or_libc("lseek", libc::lseek as LseekFn),
        open: resolve_or_libc("open", open_fallback as OpenFn),
        fstat: resolve_or_libc("fstat", libc::fstat as FstatFn),
        ioctl: resolve_or_libc("ioctl", ioctl_fallback as IoctlFn),
        getpid: resolve_or_libc("getpid", libc::getpid as GetpidFn),
        kill: resolve_or_libc("kill", libc::kill as KillFn),
        waitpid: resolve_or_libc("waitpid", libc::waitpid as WaitpidFn),
        setpgid: resolve_or_libc("setpgid", libc::setpgid as SetpgidFn),
        getpgid: resolve_or_libc("getpgid", libc::getpgid as GetpgidFn),
        setsid: resolve_or_libc("setsid", libc::setsid as SetsidFn),
        getsid: resolve_or_libc("getsid", libc::getsid as GetsidFn),
        tcgetpgrp: resolve_or_libc("tcgetpgrp", libc::tcgetpgrp as TcgetpgrpFn),
        tcsetpgrp: resolve_or_libc("tcsetpgrp", libc::tcsetpgrp as TcsetpgrpFn),
        sigaction: resolve_or_libc("sigaction", libc::sigaction as SigactionFn),
        sigprocmask: resolve_or_libc("sigprocmask", libc::sigprocmask as SigprocmaskFn),
        sigpending: resolve_or_libc("sigpending", libc::sigpending as SigpendingFn),
        sigsuspend: resolve_or_libc("sigsuspend", libc::sigsuspend as SigsuspendFn),
        raise_: resolve_or_libc("raise", libc::raise as RaiseFn),
        pthread_create: resolve_or_libc("pthread_create", libc::pthread_create as PthreadCreateFn),
    });
    &TABLE
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> nix::Result<usize> {
    let ret = unsafe { (table().read)(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    err(ret).map(|n| n as usize)
}

pub fn write(fd: RawFd, buf: &[u8]) -> nix::Result<usize> {
    let ret = unsafe { (table().write)(fd, buf.as_ptr() as *const c_void, buf.len()) };
    err(ret).map(|n| n as usize)
}

pub fn close(fd: RawFd) -> nix::Result<()> {
    let ret = unsafe { (table().close)(fd) };
    err(ret).map(|_| ())
}

pub fn dup(fd: RawFd) -> nix::Result<RawFd> {
    let ret = unsafe { (table().dup)(fd) };
    err(ret)
}

pub fn dup2(fd: RawFd, target: RawFd) -> nix::Result<RawFd> {
    let ret = unsafe { (table().dup2)(fd, target) };
    err(ret)
}

pub fn pipe() -> nix::Result<(RawFd, RawFd)> {
    let mut fds: [c_int; 2] = [0, 0];
    let ret = unsafe { (table().pipe)(fds.as_mut_ptr()) };
    err(ret)?;
    Ok((fds[0], fds[1]))
}

pub fn lseek(fd: RawFd, offset: off_t, whence: c_int) -> nix::Result<off_t> {
    let ret = unsafe { (table().lseek)(fd, offset, whence) };
    err(ret)
}

/// Clones `fd` with close-on-exec, via the raw table rather than
/// `fcntl` (not in the interposed symbol set, but kept here so every
/// fd-duplicating path lives in one place).
pub fn dup_cloexec(fd: RawFd) -> nix::Result<RawFd> {
    match nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_DUPFD_CLOEXEC(0)) {
        Ok(new_fd) => Ok(new_fd),
        Err(Errno::EINVAL) => {
            let new_fd = dup(fd)?;
            let flags = nix::fcntl::fcntl(new_fd, nix::fcntl::FcntlArg::F_GETFD)?;
            nix::fcntl::fcntl(
                new_fd,
                nix::fcntl::FcntlArg::F_SETFD(
                    nix::fcntl::OFlag::from_bits_truncate(flags) | nix::fcntl::OFlag::from_bits_truncate(libc::FD_CLOEXEC),
                ),
            )?;
            Ok(new_fd)
        }
        Err(e) => Err(e),
    }
}

pub fn open(path: &std::ffi::CStr, oflag: c_int, mode: libc::mode_t) -> nix::Result<RawFd> {
    let ret = unsafe { (table().open)(path.as_ptr(), oflag, mode) };
    err(ret)
}

pub fn fstat(fd: RawFd) -> nix::Result<libc::stat> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let ret = unsafe { (table().fstat)(fd, &mut st) };
    err(ret)?;
    Ok(st)
}

/// A fixed single-pointer-argument `ioctl`, matching the common shape of
/// every request this crate actually services (`TIOCGWINSZ`, `TIOCSPTLCK`,
/// `TIOCGPTN`, `TIOCPKT`). Host `ioctl` calls this crate doesn't know about
/// pass straight through unexamined.
pub fn ioctl(fd: RawFd, request: libc::c_ulong, argp: *mut c_void) -> nix::Result<c_int> {
    let ret = unsafe { (table().ioctl)(fd, request, argp) };
    err(ret)
}

pub fn getpid() -> pid_t {
    unsafe { (table().getpid)() }
}

pub fn kill(pid: pid_t, sig: c_int) -> nix::Result<()> {
    let ret = unsafe { (table().kill)(pid, sig) };
    err(ret).map(|_| ())
}

pub fn waitpid(pid: pid_t, options: c_int) -> nix::Result<(pid_t, c_int)> {
    let mut status: c_int = 0;
    let ret = unsafe { (table().waitpid)(pid, &mut status, options) };
    err(ret)?;
    Ok((ret, status))
}

pub fn setpgid(pid: pid_t, pgid: pid_t) -> nix::Result<()> {
    let ret = unsafe { (table().setpgid)(pid, pgid) };
    err(ret).map(|_| ())
}

pub fn getpgid(pid: pid_t) -> nix::Result<pid_t> {
    let ret = unsafe { (table().getpgid)(pid) };
    err(ret)
}

pub fn setsid() -> nix::Result<pid_t> {
    let ret = unsafe { (table().setsid)() };
    err(ret)
}

pub fn getsid(pid: pid_t) -> nix::Result<pid_t> {
    let ret = unsafe { (table().getsid)(pid) };
    err(ret)
}

pub fn tcgetpgrp(fd: RawFd) -> nix::Result<pid_t> {
    let ret = unsafe { (table().tcgetpgrp)(fd) };
    err(ret)
}

pub fn tcsetpgrp(fd: RawFd, pgrp: pid_t) -> nix::Result<()> {
    let ret = unsafe { (table().tcsetpgrp)(fd, pgrp) };
    err(ret).map(|_| ())
}

pub fn sigaction(sig: c_int, new: *const libc::sigaction, old: *mut libc::sigaction) -> nix::Result<()> {
    let ret = unsafe { (table().sigaction)(sig, new, old) };
    err(ret).map(|_| ())
}

pub fn sigprocmask(how: c_int, new: *const libc::sigset_t, old: *mut libc::sigset_t) -> nix::Result<()> {
    let ret = unsafe { (table().sigprocmask)(how, new, old) };
    err(ret).map(|_| ())
}

pub fn sigpending(set: *mut libc::sigset_t) -> nix::Result<()> {
    let ret = unsafe { (table().sigpending)(set) };
    err(ret).map(|_| ())
}

pub fn sigsuspend(mask: *const libc::sigset_t) -> nix::Result<()> {
    let ret = unsafe { (table().sigsuspend)(mask) };
    err(ret).map(|_| ())
}

pub fn raise(sig: c_int) -> nix::Result<()> {
    let ret = unsafe { (table().raise_)(sig) };
    err(ret).map(|_| ())
}

pub fn pthread_create(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> c_int {
    unsafe { (table().pthread_create)(thread, attr, start_routine, arg) }
}
