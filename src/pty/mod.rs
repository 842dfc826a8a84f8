//! PTY subsystem: master/slave driver tables and `/dev/pts` provisioning
//! under the virtualized root (§4.6).

pub mod devpts;
pub mod driver;

use once_cell::sync::Lazy;

pub use driver::{PtyTable, SlaveInfo, MAX_PTYS};

/// Process-wide pty table, analogous to `TaskTable::global`.
pub fn global() -> &'static PtyTable {
    static TABLE: Lazy<PtyTable> = Lazy::new(PtyTable::new);
    &TABLE
}
