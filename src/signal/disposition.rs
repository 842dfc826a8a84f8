//! Signal disposition as a tagged variant, per spec design note: prefer
//! `handler | default-terminate | default-ignore | default-core` over
//! encoding via raw function pointers where possible, so cross-platform
//! defaults are explicit instead of riding on a possibly-stale pointer.

use libc::c_int;

pub type RawHandler = extern "C" fn(c_int);

#[derive(Clone, Copy, Debug)]
pub enum Disposition {
    /// SIG_DFL for signals whose default action terminates the process
    /// (e.g. SIGTERM, SIGINT).
    DefaultTerminate,
    /// SIG_DFL for signals whose default action is to be ignored
    /// (e.g. SIGCHLD, SIGURG).
    DefaultIgnore,
    /// SIG_DFL for signals whose default action dumps core
    /// (e.g. SIGQUIT, SIGSEGV, SIGABRT).
    DefaultCore,
    /// SIG_IGN.
    Ignore,
    /// A registered handler.
    Handler(RawHandler),
}

/// Classifies the POSIX default action for `sig`, used to seed a fresh
/// task entry's disposition table and to drive "default-terminate" status
/// synthesis during delivery.
pub fn default_for(sig: c_int) -> Disposition {
    match sig {
        libc::SIGCHLD | libc::SIGURG | libc::SIGWINCH | libc::SIGCONT => Disposition::DefaultIgnore,
        libc::SIGQUIT | libc::SIGILL | libc::SIGTRAP | libc::SIGABRT | libc::SIGFPE | libc::SIGBUS
        | libc::SIGSEGV | libc::SIGSYS | libc::SIGXCPU | libc::SIGXFSZ => Disposition::DefaultCore,
        _ => Disposition::DefaultTerminate,
    }
}

pub const NSIG: usize = 65;

/// A fixed-size per-signal disposition table, indices `1..=64` valid
/// (index 0 unused, matching signal numbering).
#[derive(Clone, Copy)]
pub struct DispositionTable([Disposition; NSIG]);

impl DispositionTable {
    pub fn new() -> Self {
        let mut table = [Disposition::DefaultTerminate; NSIG];
        for (sig, slot) in table.iter_mut().enumerate().skip(1) {
            *slot = default_for(sig as c_int);
        }
        DispositionTable(table)
    }

    pub fn get(&self, sig: c_int) -> Disposition {
        self.0[sig as usize]
    }

    pub fn set(&mut self, sig: c_int, disposition: Disposition) -> Disposition {
        let prev = self.0[sig as usize];
        self.0[sig as usize] = disposition;
        prev
    }
}

impl Default for DispositionTable {
    fn default() -> Self {
        Self::new()
    }
}

pub const STOP_SIGNALS: &[c_int] = &[libc::SIGTSTP, libc::SIGSTOP, libc::SIGTTIN, libc::SIGTTOU];

pub fn is_stop_signal(sig: c_int) -> bool {
    STOP_SIGNALS.contains(&sig)
}

pub fn is_continue_signal(sig: c_int) -> bool {
    sig == libc::SIGCONT
}

/// A 64-bit signal mask, bit `sig - 1` for signal `sig`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SigMask(pub u64);

impl SigMask {
    pub fn empty() -> Self {
        SigMask(0)
    }

    pub fn has(&self, sig: c_int) -> bool {
        self.0 & (1u64 << (sig - 1)) != 0
    }

    pub fn add(&mut self, sig: c_int) {
        self.0 |= 1u64 << (sig - 1);
    }

    pub fn remove(&mut self, sig: c_int) {
        self.0 &= !(1u64 << (sig - 1));
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
