//! The interposition engine: resolves, gates, and re-exports the libc
//! surface a loaded build of this crate takes over. §4.7/§6.
//!
//! Loading this crate as a preloaded shared object gets you, at process
//! start, a `ctor`-run warm-up pass that resolves the real libc entry
//! points and records the main thread, with the master switch left off
//! until a host calls [`enable`] once it has something to route calls to.

pub mod bypass;
pub mod gate;
pub mod raw;
pub mod resolver;
pub mod shims;
pub mod vtty;
pub mod warmup;

use tracing::trace;

/// Turns interception on. A host calls this once it has created at least
/// one vproc, or otherwise wants the gate live.
pub fn enable() {
    gate::enable_master();
    gate::mark_ready();
}

pub fn disable() {
    gate::disable_master();
}

#[ctor::ctor]
fn bootstrap() {
    warmup::warm_up();
    trace!("interposition engine bootstrapped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_disable_round_trip() {
        enable();
        assert!(gate::is_ready());
        disable();
    }
}
