//! `/dev/pts` node provisioning for the virtualized root. Two-tier like
//! the original: `ensure_root` (the directory + `ptmx`) always runs before
//! `ensure_slave_node` (the per-slave `/dev/pts/N` file), and both are
//! re-applied whenever a slave's mode/uid/gid changes via `set_slave_info`.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::warn;

use crate::interpose::bypass::with_raw_bypass;
use crate::path;

use super::driver::SlaveInfo;

pub fn ensure_root(prefix: &str) {
    path::provision::provision_devpts_root(prefix);
}

/// Creates (or re-syncs the permissions of) `<prefix>/dev/pts/<pty_num>`.
pub fn ensure_slave_node(prefix: &str, pty_num: u32, info: SlaveInfo) {
    ensure_root(prefix);

    let node = Path::new(prefix).join("dev/pts").join(pty_num.to_string());

    with_raw_bypass(|| {
        if !node.exists() {
            if let Err(e) = std::fs::File::create(&node) {
                warn!(path = %node.display(), error = %e, "failed to create devpts slave node");
                return;
            }
        }
        if let Err(e) = std::fs::set_permissions(&node, std::fs::Permissions::from_mode(info.perms)) {
            warn!(path = %node.display(), error = %e, "failed to chmod devpts slave node");
        }
        let c_path = std::ffi::CString::new(node.as_os_str().to_string_lossy().as_bytes()).unwrap();
        unsafe {
            let _ = libc::chown(c_path.as_ptr(), info.uid, info.gid);
        }
    });
}

pub fn remove_slave_node(prefix: &str, pty_num: u32) {
    let node = Path::new(prefix).join("dev/pts").join(pty_num.to_string());
    with_raw_bypass(|| {
        let _ = std::fs::remove_file(&node);
    });
}
