//! Per-vproc signal core: disposition table, blocked mask, pending set,
//! and synchronous delivery on unblock. Ported from §4.5.

pub mod disposition;
pub mod shim;

pub use disposition::{Disposition, RawHandler, SigMask};
pub use shim::{raise, reset_to_default, sigaction, sigpending, sigprocmask, sigsuspend, signal, How};
