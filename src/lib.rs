//! User-space virtual-process runtime and libc interposition layer.
//!
//! A [`vproc::VProc`](crate::vproc::VProc) lets a thread inside a host
//! process behave as if it were its own UNIX process: its own fd table,
//! pid, process group/session, signal dispositions and controlling
//! terminal. The [`interpose`] module reroutes the libc surface to this
//! runtime when an active vproc is associated with the calling thread;
//! [`path`] maps a configured host prefix on and off the virtual root.

pub mod errors;
pub mod interpose;
pub mod path;
pub mod pty;
pub mod session;
pub mod signal;
pub mod vproc;

pub use errors::{err, VprocError};

/// Installs a `tracing-subscriber` `fmt` layer for host programs that embed
/// this runtime directly. The interposition engine never calls this itself:
/// a preloaded shared object must not assume it owns the process's logging
/// setup, and must keep working if no subscriber is ever installed.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Cross-module scenarios that exercise more than one of the modules above
/// together, rather than any single one's internals in isolation.
#[cfg(test)]
mod scenarios {
    use crate::path;
    use crate::vproc::task_table::TaskTable;
    use crate::vproc::{self, shims as vshims, VProcOptions};

    /// §8 scenario 3: two threads each create a vproc via a distinct
    /// `pid_hint`; both are visible in a snapshot while alive, neither is
    /// once exited and reaped.
    #[test]
    fn snapshot_reflects_live_tasks_across_threads() {
        let hints = [9001, 9002];

        let handles: Vec<_> = hints
            .iter()
            .map(|&hint| {
                std::thread::spawn(move || {
                    let mut opts = VProcOptions::default();
                    opts.pid_hint = Some(hint);
                    let vp = vproc::create(opts, 1).unwrap();
                    vproc::activate(vp.clone());
                    vp.pid()
                })
            })
            .collect();

        let pids: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let live = TaskTable::global()
            .snapshot()
            .into_iter()
            .filter(|s| pids.contains(&s.pid))
            .count();
        assert_eq!(live, pids.len());

        for &pid in &pids {
            TaskTable::global().mark_exit(pid, 0);
            TaskTable::global().waitpid(pid, false, false).unwrap();
        }

        let remaining = TaskTable::global()
            .snapshot()
            .into_iter()
            .filter(|s| pids.contains(&s.pid))
            .count();
        assert_eq!(remaining, 0);
    }

    /// §8 scenario 6, driven through the public vproc-shim surface rather
    /// than the task table directly: two vprocs joined into one process
    /// group both observe `SIGTSTP` from a single `kill(-pgid, ...)`.
    #[test]
    fn pgroup_kill_stops_every_member_via_shims() {
        let mut opts_a = VProcOptions::default();
        opts_a.pid_hint = Some(9101);
        let a = vproc::create(opts_a, 1).unwrap();

        let mut opts_b = VProcOptions::default();
        opts_b.pid_hint = Some(9102);
        let b = vproc::create(opts_b, 1).unwrap();

        vproc::activate(a.clone());
        vshims::set_pgid_shim(a.pid(), a.pid()).unwrap();
        vproc::activate(b.clone());
        vshims::set_pgid_shim(b.pid(), a.pid()).unwrap();
        vproc::deactivate();

        vshims::kill_shim(-a.pid(), libc::SIGTSTP).unwrap();

        for pid in [a.pid(), b.pid()] {
            let (got, status) = vshims::wait_pid_shim(pid, false, true).unwrap();
            assert_eq!(got, pid);
            assert_eq!((status >> 8) & 0xff, libc::SIGTSTP);
        }

        for vp in [&a, &b] {
            vproc::activate(vp.clone());
            vshims::mark_exit_shim(0).unwrap();
            vproc::deactivate();
            vshims::wait_pid_shim(vp.pid(), false, false).unwrap();
        }
    }

    /// §8 scenario 5: a `VProc` opening a virtual-root path actually
    /// lands in (and is readable back from) the truncated host directory.
    #[test]
    fn path_truncate_sandbox_write_is_readable_at_host_path() {
        let dir = std::env::temp_dir().join(format!("vproc-sandbox-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        path::set_prefix_for_test(&dir);

        let vp = vproc::create(VProcOptions::default(), 1).unwrap();
        vproc::activate(vp.clone());

        let vfd = vp
            .open_at(
                "/sandbox.txt",
                nix::fcntl::OFlag::O_CREAT | nix::fcntl::OFlag::O_WRONLY,
                nix::sys::stat::Mode::from_bits_truncate(0o644),
            )
            .unwrap();
        let host_fd = vp.translate(vfd).unwrap();
        nix::unistd::write(host_fd, b"hello").unwrap();
        vp.close(vfd).unwrap();

        vproc::deactivate();
        vproc::destroy(&vp);

        let on_host = std::fs::read(dir.join("sandbox.txt")).unwrap();
        assert_eq!(on_host, b"hello");
        assert_eq!(path::expand("/sandbox.txt"), dir.join("sandbox.txt").to_str().unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
