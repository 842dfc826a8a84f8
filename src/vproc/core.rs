//! The `VProc` itself: owns an fd table and a winsize, is referenced by a
//! task-table entry for its pid, and is activated on at most one thread at
//! a time via thread-local storage. Ported from `VProc`/`vprocCreate`/
//! `vprocActivate`/`vprocCurrent` in `vproc.c`.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::unistd::{close, dup, pipe as nix_pipe};
use parking_lot::Mutex;
use tracing::trace;

use crate::errors::VprocError;
use crate::path;

use super::fd_table::FdTable;
use super::options::{StdinSource, VProcOptions, Winsize};
use super::task_table::TaskTable;

pub struct VProc {
    pid: i32,
    fds: Mutex<FdTable>,
    winsize: Mutex<Winsize>,
}

thread_local! {
    static ACTIVE: RefCell<Option<Arc<VProc>>> = const { RefCell::new(None) };
}

impl VProc {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn winsize(&self) -> Winsize {
        *self.winsize.lock()
    }

    pub fn set_winsize(&self, winsize: Winsize) {
        *self.winsize.lock() = winsize;
    }

    pub fn translate(&self, vfd: i32) -> Result<RawFd, VprocError> {
        self.fds.lock().translate(vfd)
    }

    pub fn dup(&self, vfd: i32) -> Result<i32, VprocError> {
        self.fds.lock().dup(vfd)
    }

    pub fn dup2(&self, vfd: i32, target: i32) -> Result<i32, VprocError> {
        self.fds.lock().dup2(vfd, target)
    }

    pub fn close(&self, vfd: i32) -> Result<(), VprocError> {
        self.fds.lock().close(vfd)
    }

    pub fn pipe(&self) -> Result<(i32, i32), VprocError> {
        let (r, w) = nix_pipe().map_err(VprocError::Errno)?;
        let mut fds = self.fds.lock();
        Ok((fds.adopt(r), fds.adopt(w)))
    }

    /// Opens `path` (already expanded by the path-virtualization layer, if
    /// enabled) against the host and adopts the resulting fd into this
    /// vproc's table.
    pub fn open_at(&self, path: &str, oflag: nix::fcntl::OFlag, mode: nix::sys::stat::Mode) -> Result<i32, VprocError> {
        let expanded = path::expand(path);
        let fd = nix::fcntl::open(expanded.as_str(), oflag, mode).map_err(VprocError::Errno)?;
        Ok(self.fds.lock().adopt(fd))
    }

    pub fn register_thread(&self, tid: libc::pthread_t) {
        TaskTable::global().register_thread(self.pid, tid);
    }

    pub fn mark_exit(&self, code: i32) {
        TaskTable::global().mark_exit(self.pid, code);
    }
}

fn open_stdin(source: StdinSource) -> nix::Result<RawFd> {
    match source {
        StdinSource::Inherit => dup(0),
        StdinSource::HostFd(fd) => dup(fd),
        StdinSource::DevNull => nix::fcntl::open(
            "/dev/null",
            nix::fcntl::OFlag::O_RDONLY,
            nix::sys::stat::Mode::empty(),
        ),
    }
}

/// Creates a new `VProc`: reserves a synthetic pid (honoring `pid_hint`),
/// registers it in the global task table as its own process group and
/// session, and preloads fds 0/1/2 with close-on-exec clones per
/// `opts`.
pub fn create(opts: VProcOptions, parent_pid: i32) -> Result<Arc<VProc>, VprocError> {
    let pid = TaskTable::global().reserve_pid(opts.pid_hint);
    TaskTable::global().create(pid, parent_pid);

    let mut fds = FdTable::new();

    let stdin_fd = open_stdin(opts.stdin).map_err(VprocError::Errno)?;
    fds.install(0, stdin_fd);

    let stdout_fd = match opts.stdout_fd {
        Some(fd) => dup(fd).map_err(VprocError::Errno)?,
        None => dup(1).map_err(VprocError::Errno)?,
    };
    fds.install(1, stdout_fd);

    let stderr_fd = match opts.stderr_fd {
        Some(fd) => dup(fd).map_err(VprocError::Errno)?,
        None => dup(2).map_err(VprocError::Errno)?,
    };
    fds.install(2, stderr_fd);

    trace!(pid, "vproc created");

    Ok(Arc::new(VProc {
        pid,
        fds: Mutex::new(fds),
        winsize: Mutex::new(opts.winsize),
    }))
}

/// Destroys `vp`: closes every host fd it owns. The task-table entry is
/// left alone (a caller still needs to be able to `waitpid` it); use
/// [`TaskTable::discard`] explicitly if no one will ever wait on it.
pub fn destroy(vp: &VProc) {
    vp.fds.lock().close_all();
    trace!(pid = vp.pid, "vproc destroyed");
}

/// Activates `vp` on the calling thread. Only one vproc may be active per
/// thread; activating a new one replaces the previous activation.
pub fn activate(vp: Arc<VProc>) {
    ACTIVE.with(|cell| *cell.borrow_mut() = Some(vp));
}

pub fn deactivate() {
    ACTIVE.with(|cell| *cell.borrow_mut() = None);
}

/// The vproc active on the calling thread, if any.
pub fn current() -> Option<Arc<VProc>> {
    ACTIVE.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{read, write};

    #[test]
    fn pipe_isolation_write_visible_on_host_read_end() {
        let (host_r, host_w) = nix_pipe().unwrap();
        let mut opts = VProcOptions::default();
        opts.stdout_fd = Some(host_w);
        let vp = create(opts, 1).unwrap();
        activate(vp.clone());

        let n = write(vp.translate(1).unwrap(), b"ok").unwrap();
        assert_eq!(n, 2);

        let mut buf = [0u8; 3];
        let n = read(host_r, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"ok");

        deactivate();
        destroy(&vp);
        let _ = close(host_r);
    }

    #[test]
    fn dup2_redirection_through_pipe() {
        let vp = create(VProcOptions::default(), 1).unwrap();
        activate(vp.clone());

        let (p0, p1) = vp.pipe().unwrap();
        vp.dup2(p1, 1).unwrap();

        let n = write(vp.translate(1).unwrap(), b"iso").unwrap();
        assert_eq!(n, 3);

        let mut buf = [0u8; 3];
        let n = read(vp.translate(p0).unwrap(), &mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf, b"iso");

        deactivate();
        destroy(&vp);
    }

    #[test]
    fn dev_null_stdin_reads_eof() {
        let mut opts = VProcOptions::default();
        opts.stdin = StdinSource::DevNull;
        let vp = create(opts, 1).unwrap();
        activate(vp.clone());

        let mut buf = [0u8; 8];
        let n = read(vp.translate(0).unwrap(), &mut buf).unwrap();
        assert_eq!(n, 0);

        deactivate();
        destroy(&vp);
    }

    #[test]
    fn activation_is_thread_local() {
        assert!(current().is_none());
        let vp = create(VProcOptions::default(), 1).unwrap();
        activate(vp.clone());
        assert!(current().is_some());

        std::thread::spawn(|| {
            assert!(current().is_none());
        })
        .join()
        .unwrap();

        deactivate();
        destroy(&vp);
    }
}
