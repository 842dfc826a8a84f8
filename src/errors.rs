use nix::errno::Errno;

/// Crate-local error type for operations with more than one failure mode
/// that callers actually branch on. Most fallible internals just use
/// [`nix::Result`] directly via [`err`] below, the same way `wormhole`'s
/// `err()` helper wraps raw `-1`-on-error libc conventions.
#[derive(Debug, thiserror::Error)]
pub enum VprocError {
    #[error("pid {0} is not tracked by the task table")]
    UntrackedPid(i32),
    #[error("pty table exhausted (max {0} ptys)")]
    PtyTableExhausted(usize),
    #[error("pty {0} is locked")]
    PtyLocked(u32),
    #[error("pty number {0} out of range")]
    PtyOutOfRange(u32),
    #[error("path exceeds PATH_MAX after normalization")]
    NameTooLong,
    #[error(transparent)]
    Errno(#[from] Errno),
}

impl VprocError {
    /// Best-effort mapping onto an `errno` value for FFI boundaries that
    /// must report a plain `-1`/`errno` pair rather than this enum.
    pub fn to_errno(&self) -> Errno {
        match self {
            VprocError::UntrackedPid(_) => Errno::ESRCH,
            VprocError::PtyTableExhausted(_) => Errno::ENOSPC,
            VprocError::PtyLocked(_) => Errno::EIO,
            VprocError::PtyOutOfRange(_) => Errno::ENXIO,
            VprocError::NameTooLong => Errno::ENAMETOOLONG,
            VprocError::Errno(e) => *e,
        }
    }
}

trait IsMinusOne {
    fn is_minus_one(&self) -> bool;
}

macro_rules! impl_is_minus_one {
    ($($ty:ty),*) => {
        $(impl IsMinusOne for $ty {
            fn is_minus_one(&self) -> bool {
                *self == -1
            }
        })*
    };
}

impl_is_minus_one!(i64, i32, isize);

fn once<T: IsMinusOne + Copy>(ret: T) -> nix::Result<T> {
    if ret.is_minus_one() {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

/// Converts a raw `-1`-on-error return value into a [`nix::Result`],
/// retrying transparently on `EINTR`. Every raw libc call this crate makes
/// in its "host fallback" and raw-bypass paths goes through this.
pub fn err<T: IsMinusOne + Copy>(ret: T) -> nix::Result<T> {
    loop {
        match once(ret) {
            Err(Errno::EINTR) => {}
            other => return other,
        }
    }
}
