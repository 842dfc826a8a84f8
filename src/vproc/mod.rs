//! The virtual-process runtime: per-vproc fd tables, activation, and the
//! process-wide task table backing wait/kill.

pub mod core;
pub mod fd_table;
pub mod identity;
pub mod options;
pub mod scope;
pub mod shims;
pub mod task_table;

pub use core::{activate, create, current, deactivate, destroy, VProc};
pub use options::{StdinSource, VProcOptions, Winsize};
pub use scope::CommandScope;
pub use task_table::{Snapshot, TaskTable, ThreadDirected};
