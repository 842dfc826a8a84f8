//! RAII replacement for the original's manual `vprocCommandScopeBegin`/
//! `vprocCommandScopeEnd` pair: an in-process command runner (a smallclu
//! applet, say) can represent itself as a child vproc for the scope's
//! lifetime and have it torn down automatically on drop.

use std::sync::Arc;

use super::core::{self, VProc};
use super::options::VProcOptions;
use super::task_table::TaskTable;
use crate::errors::VprocError;

pub struct CommandScope {
    previous: Option<Arc<VProc>>,
    vp: Arc<VProc>,
}

impl CommandScope {
    /// Creates and activates a child vproc representing the invoked
    /// command, remembering whatever was active before so it can be
    /// restored on drop.
    pub fn begin(opts: VProcOptions) -> Result<Self, VprocError> {
        let previous = core::current();
        let parent_pid = previous.as_ref().map(|p| p.pid()).unwrap_or(0);
        let vp = core::create(opts, parent_pid)?;
        core::activate(vp.clone());
        Ok(CommandScope { previous, vp })
    }

    pub fn pid(&self) -> i32 {
        self.vp.pid()
    }

    pub fn vproc(&self) -> &Arc<VProc> {
        &self.vp
    }
}

impl Drop for CommandScope {
    fn drop(&mut self) {
        self.vp.mark_exit(0);
        core::destroy(&self.vp);
        TaskTable::global().discard(self.vp.pid());
        match self.previous.take() {
            Some(prev) => core::activate(prev),
            None => core::deactivate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_restores_previous_activation_on_drop() {
        assert!(core::current().is_none());
        {
            let scope = CommandScope::begin(VProcOptions::default()).unwrap();
            assert_eq!(core::current().unwrap().pid(), scope.pid());
        }
        assert!(core::current().is_none());
    }
}
