//! On-demand provisioning of the directories and device nodes a truncated
//! root needs: `<prefix>/tmp`, `<prefix>/var/tmp`, `<prefix>/dev` symlinks,
//! `<prefix>/dev/pts`. All failures here are logged and swallowed — a
//! sandbox that can't provision `/var/tmp` still needs to run.

use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use tracing::warn;

use crate::interpose::bypass::with_raw_bypass;

fn ensure_dir(path: &Path, mode: u32) {
    with_raw_bypass(|| {
        if path.is_dir() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(path) {
            warn!(path = %path.display(), error = %e, "failed to provision directory");
            return;
        }
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
    });
}

fn ensure_symlink(target: &str, link: &Path) {
    with_raw_bypass(|| {
        if link.exists() || link.symlink_metadata().is_ok() {
            return;
        }
        if let Err(e) = symlink(target, link) {
            warn!(link = %link.display(), error = %e, "failed to provision device symlink");
        }
    });
}

/// Ensures `<prefix>/tmp` and `<prefix>/var/tmp` exist.
pub fn provision_tmp(prefix: &str) {
    ensure_dir(Path::new(prefix).join("tmp").as_path(), 0o1777);
    ensure_dir(Path::new(prefix).join("var/tmp").as_path(), 0o1777);
}

/// Seeds `<prefix>/dev` with symlinks for `null`/`zero` pointing at the
/// real host device nodes.
pub fn provision_dev(prefix: &str) {
    let dev = Path::new(prefix).join("dev");
    ensure_dir(&dev, 0o755);
    ensure_symlink("/dev/null", &dev.join("null"));
    ensure_symlink("/dev/zero", &dev.join("zero"));
}

/// Ensures `<prefix>/dev/pts` (0755) and `<prefix>/dev/pts/ptmx` (0666)
/// exist. Per-slave nodes are provisioned separately by `pty::devpts`.
pub fn provision_devpts_root(prefix: &str) {
    let pts = Path::new(prefix).join("dev/pts");
    ensure_dir(&pts, 0o755);

    let ptmx = pts.join("ptmx");
    with_raw_bypass(|| {
        if !ptmx.exists() {
            if let Err(e) = std::fs::File::create(&ptmx) {
                warn!(path = %ptmx.display(), error = %e, "failed to provision ptmx node");
                return;
            }
        }
        let _ = std::fs::set_permissions(&ptmx, std::fs::Permissions::from_mode(0o666));
    });
}
