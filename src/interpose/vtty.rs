//! Virtual TTY fallback (§4.8): when enabled, stdin/stdout/stderr report as
//! interactive even when backed by a pipe. The real fd backing each
//! standard stream is recorded so that termios queries/sets and
//! `TIOCGWINSZ` route to it (or to a synthesized default), and `isatty`
//! reports true for the three standard streams regardless of what they're
//! actually backed by.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::path::env;
use crate::vproc::options::Winsize;

static ENABLED: AtomicBool = AtomicBool::new(false);

const NONE: i32 = -1;
static STDIN_BACKING: AtomicI32 = AtomicI32::new(NONE);
static STDOUT_BACKING: AtomicI32 = AtomicI32::new(NONE);
static STDERR_BACKING: AtomicI32 = AtomicI32::new(NONE);

pub fn enable() {
    ENABLED.store(true, Ordering::Release);
}

pub fn disable() {
    ENABLED.store(false, Ordering::Release);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

fn slot(fd: RawFd) -> Option<&'static AtomicI32> {
    match fd {
        0 => Some(&STDIN_BACKING),
        1 => Some(&STDOUT_BACKING),
        2 => Some(&STDERR_BACKING),
        _ => None,
    }
}

/// Records `real_fd` as the backing fd for standard stream `std_fd`
/// (0/1/2), so termios operations on `std_fd` route to it instead of
/// whatever the fd table currently translates it to.
pub fn record_backing(std_fd: RawFd, real_fd: RawFd) {
    if let Some(cell) = slot(std_fd) {
        cell.store(real_fd, Ordering::Release);
    }
}

pub fn clear_backing(std_fd: RawFd) {
    if let Some(cell) = slot(std_fd) {
        cell.store(NONE, Ordering::Release);
    }
}

/// The real host fd backing `std_fd`, if one has been recorded.
pub fn backing_fd(std_fd: RawFd) -> Option<RawFd> {
    slot(std_fd).map(|c| c.load(Ordering::Acquire)).filter(|v| *v != NONE)
}

/// `isatty`: true for any of the three standard streams while the fallback
/// is enabled, regardless of what the fd is actually backed by.
pub fn isatty_override(fd: RawFd) -> bool {
    is_enabled() && (0..=2).contains(&fd)
}

/// `TIOCGWINSZ` synthesis: `LINES`/`COLUMNS` if set, else a fixed default.
pub fn synthesize_winsize() -> Winsize {
    let (cols, rows) = env::fallback_winsize();
    Winsize { cols, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backing_fd_round_trips_and_clears() {
        record_backing(0, 42);
        assert_eq!(backing_fd(0), Some(42));
        clear_backing(0);
        assert_eq!(backing_fd(0), None);
    }

    #[test]
    fn isatty_override_only_covers_standard_streams() {
        enable();
        assert!(isatty_override(1));
        assert!(!isatty_override(3));
        disable();
        assert!(!isatty_override(1));
    }
}
