//! Per-window session stdio bundle: the host fds backing stdin/stdout/
//! stderr for an interactive window, plus the input reader shared by all
//! threads of that session. Ported from `VProcSessionStdio` in §4.4.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::unistd::dup;

use super::input::SessionInput;

pub struct SessionStdio {
    pub stdin_host_fd: RawFd,
    pub stdout_host_fd: RawFd,
    pub stderr_host_fd: RawFd,
    pub kernel_pid: i32,
    pub input: Arc<SessionInput>,
}

impl SessionStdio {
    pub fn create(stdin_fd: RawFd, stdout_fd: RawFd, stderr_fd: RawFd, kernel_pid: i32) -> nix::Result<Arc<SessionStdio>> {
        let stdin_host_fd = dup(stdin_fd)?;
        let stdout_host_fd = dup(stdout_fd)?;
        let stderr_host_fd = dup(stderr_fd)?;
        let input = SessionInput::new(stdin_host_fd);
        Ok(Arc::new(SessionStdio {
            stdin_host_fd,
            stdout_host_fd,
            stderr_host_fd,
            kernel_pid,
            input,
        }))
    }
}

impl Drop for SessionStdio {
    fn drop(&mut self) {
        self.input.stop_reader();
        let _ = nix::unistd::close(self.stdin_host_fd);
        let _ = nix::unistd::close(self.stdout_host_fd);
        let _ = nix::unistd::close(self.stderr_host_fd);
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<Arc<SessionStdio>>> = const { RefCell::new(None) };
}

/// Attaches `stdio` to the calling thread. Unlike vproc activation,
/// session stdio is read-mostly shared state (the `input` object is
/// explicitly meant to be used from every thread of the session), so
/// "activation" here just means "this is the session the current thread
/// belongs to" for `readShim`'s routing decision.
pub fn activate(stdio: Arc<SessionStdio>) {
    ACTIVE.with(|cell| *cell.borrow_mut() = Some(stdio));
}

pub fn current() -> Option<Arc<SessionStdio>> {
    ACTIVE.with(|cell| cell.borrow().clone())
}

pub fn deactivate() {
    ACTIVE.with(|cell| *cell.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    #[test]
    fn activation_is_visible_on_the_activating_thread() {
        let (r, w) = pipe().unwrap();
        let stdio = SessionStdio::create(r, w, w, 1).unwrap();
        assert!(current().is_none());
        activate(stdio.clone());
        assert!(current().is_some());
        deactivate();
        let _ = nix::unistd::close(r);
        let _ = nix::unistd::close(w);
    }
}
