use std::os::unix::io::RawFd;

/// Where a vproc's stdin should come from at creation time. Replaces the
/// original's `stdin_fd == -1 | -2` sentinel convention with a proper enum
/// while keeping identical semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdinSource {
    /// Clone the host process's real stdin (fd 0).
    #[default]
    Inherit,
    /// Clone a specific host fd.
    HostFd(RawFd),
    /// Open `/dev/null` for reading.
    DevNull,
}

#[derive(Debug, Clone, Copy)]
pub struct Winsize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for Winsize {
    fn default() -> Self {
        let (cols, rows) = crate::path::env::fallback_winsize();
        Winsize { cols, rows }
    }
}

/// Construction-time options for a new [`super::VProc`], mirroring
/// `VProcOptions`/`vprocDefaultOptions()`.
#[derive(Debug, Clone, Copy)]
pub struct VProcOptions {
    pub stdin: StdinSource,
    /// Host fd to clone for stdout; `None` inherits the host's stdout.
    pub stdout_fd: Option<RawFd>,
    /// Host fd to clone for stderr; `None` inherits the host's stderr.
    pub stderr_fd: Option<RawFd>,
    pub winsize: Winsize,
    /// Advances the synthetic pid counter so the created vproc gets (at
    /// least) this pid, avoiding collisions with a caller-tracked value.
    pub pid_hint: Option<i32>,
}

impl Default for VProcOptions {
    fn default() -> Self {
        VProcOptions {
            stdin: StdinSource::default(),
            stdout_fd: None,
            stderr_fd: None,
            winsize: Winsize::default(),
            pid_hint: None,
        }
    }
}
