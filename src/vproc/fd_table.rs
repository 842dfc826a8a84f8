//! Per-vproc virtual-fd table: small-integer vfd -> host fd, with
//! stdin/stdout/stderr preloaded, growable capacity, and round-robin
//! free-slot reuse. Ported from `VProcFdTable`/`vprocAllocSlot` in
//! `vproc.c`.

use nix::errno::Errno;
use std::os::unix::io::RawFd;

use crate::errors::VprocError;
use crate::interpose::raw;

const INITIAL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy)]
struct FdEntry {
    /// `None` ⇔ slot is free.
    host_fd: Option<RawFd>,
}

impl FdEntry {
    const FREE: FdEntry = FdEntry { host_fd: None };
}

pub struct FdTable {
    entries: Vec<FdEntry>,
    /// Rotating hint for the next allocation scan; not an authoritative
    /// "next free" pointer, just where the scan starts.
    next_fd: usize,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable {
            entries: vec![FdEntry::FREE; INITIAL_CAPACITY],
            next_fd: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn grow(&mut self) {
        let new_cap = (self.entries.len() * 2).max(INITIAL_CAPACITY);
        self.entries.resize(new_cap, FdEntry::FREE);
    }

    fn grow_to_cover(&mut self, target: usize) {
        while self.entries.len() <= target {
            self.grow();
        }
    }

    /// Scans from `next_fd`, wrapping modulo capacity, for the first free
    /// slot; doubles capacity on exhaustion and returns the first newly
    /// created slot.
    fn alloc_slot(&mut self) -> usize {
        let cap = self.entries.len();
        for i in 0..cap {
            let idx = (self.next_fd + i) % cap;
            if self.entries[idx].host_fd.is_none() {
                self.next_fd = (idx + 1) % cap;
                return idx;
            }
        }
        let idx = cap;
        self.grow();
        self.next_fd = (idx + 1) % self.entries.len();
        idx
    }

    /// Installs `host_fd` preloaded at `vfd` (used for stdin/stdout/stderr
    /// at creation time); does not clone, the caller already cloned it.
    pub(super) fn install(&mut self, vfd: usize, host_fd: RawFd) {
        self.grow_to_cover(vfd);
        self.entries[vfd] = FdEntry { host_fd: Some(host_fd) };
    }

    pub fn translate(&self, vfd: i32) -> Result<RawFd, VprocError> {
        let idx = usize::try_from(vfd).map_err(|_| VprocError::Errno(Errno::EBADF))?;
        match self.entries.get(idx).and_then(|e| e.host_fd) {
            Some(fd) => Ok(fd),
            None => Err(VprocError::Errno(Errno::EBADF)),
        }
    }

    /// `dup`: clones the host fd at `vfd` into a freshly allocated slot.
    pub fn dup(&mut self, vfd: i32) -> Result<i32, VprocError> {
        let host_fd = self.translate(vfd)?;
        let cloned = raw::dup_cloexec(host_fd).map_err(VprocError::Errno)?;
        let slot = self.alloc_slot();
        self.entries[slot] = FdEntry { host_fd: Some(cloned) };
        Ok(slot as i32)
    }

    /// `dup2`: clones the host fd at `vfd` into `target`, growing capacity
    /// to cover `target` and closing whatever host fd currently occupies
    /// it first.
    pub fn dup2(&mut self, vfd: i32, target: i32) -> Result<i32, VprocError> {
        let host_fd = self.translate(vfd)?;
        let target_idx = usize::try_from(target).map_err(|_| VprocError::Errno(Errno::EBADF))?;

        if vfd == target {
            return Ok(target);
        }

        self.grow_to_cover(target_idx);
        if let Some(existing) = self.entries[target_idx].host_fd.take() {
            let _ = raw::close(existing);
        }

        let cloned = raw::dup_cloexec(host_fd).map_err(VprocError::Errno)?;
        self.entries[target_idx] = FdEntry { host_fd: Some(cloned) };
        Ok(target)
    }

    /// Installs a raw host fd at a freshly allocated slot without cloning
    /// (used by `pipe`/`open`, which already produced a fresh host fd).
    pub fn adopt(&mut self, host_fd: RawFd) -> i32 {
        let slot = self.alloc_slot();
        self.entries[slot] = FdEntry { host_fd: Some(host_fd) };
        slot as i32
    }

    pub fn close(&mut self, vfd: i32) -> Result<(), VprocError> {
        let idx = usize::try_from(vfd).map_err(|_| VprocError::Errno(Errno::EBADF))?;
        let Some(entry) = self.entries.get_mut(idx) else {
            return Err(VprocError::Errno(Errno::EBADF));
        };
        let Some(host_fd) = entry.host_fd.take() else {
            return Err(VprocError::Errno(Errno::EBADF));
        };
        raw::close(host_fd).map_err(VprocError::Errno)
    }

    /// Closes every host fd still occupying a slot (called on vproc
    /// teardown).
    pub fn close_all(&mut self) {
        for entry in &mut self.entries {
            if let Some(fd) = entry.host_fd.take() {
                let _ = raw::close(fd);
            }
        }
    }
}

impl Drop for FdTable {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    #[test]
    fn translate_returns_installed_fd() {
        let mut t = FdTable::new();
        let (r, _w) = pipe().unwrap();
        t.install(0, r);
        assert_eq!(t.translate(0).unwrap(), r);
    }

    #[test]
    fn translate_out_of_range_is_ebadf() {
        let t = FdTable::new();
        assert!(matches!(
            t.translate(5),
            Err(VprocError::Errno(Errno::EBADF))
        ));
    }

    #[test]
    fn dup_allocates_distinct_host_fd() {
        let mut t = FdTable::new();
        let (r, w) = pipe().unwrap();
        t.install(0, r);
        t.install(1, w);
        let dupped = t.dup(0).unwrap();
        assert_ne!(dupped, 0);
        assert_ne!(t.translate(dupped).unwrap(), t.translate(0).unwrap());
    }

    #[test]
    fn dup2_grows_capacity_to_cover_target() {
        let mut t = FdTable::new();
        let (r, _w) = pipe().unwrap();
        t.install(0, r);
        let target = (INITIAL_CAPACITY * 3) as i32;
        t.dup2(0, target).unwrap();
        assert!(t.capacity() as i32 > target);
        assert!(t.translate(target).is_ok());
    }

    #[test]
    fn alloc_wraps_and_doubles_on_exhaustion() {
        let mut t = FdTable::new();
        let mut allocated = Vec::new();
        for _ in 0..INITIAL_CAPACITY {
            let (r, _w) = pipe().unwrap();
            allocated.push(t.adopt(r));
        }
        assert_eq!(t.capacity(), INITIAL_CAPACITY);
        let (r, _w) = pipe().unwrap();
        let overflow = t.adopt(r);
        assert!(t.capacity() > INITIAL_CAPACITY);
        assert_eq!(overflow as usize, INITIAL_CAPACITY);
    }

    #[test]
    fn close_frees_slot_and_rejects_double_close() {
        let mut t = FdTable::new();
        let (r, _w) = pipe().unwrap();
        t.install(0, r);
        t.close(0).unwrap();
        assert!(matches!(t.close(0), Err(VprocError::Errno(Errno::EBADF))));
    }
}
