//! Minimal master/slave pty driver, indexed by `pty_num`. Ported from
//! `pscal_pty.c`'s `tty`/`pty` state machine: cyclic master<->slave
//! back-pointers are modeled as a stable index into this table rather than
//! owning pointers, so hangup can null the peer side without dangling,
//! per the spec's design note on cyclic references.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::errors::VprocError;
use crate::path;

use super::devpts;

/// `MAX_PTYS` from the original (`1 << 12`).
pub const MAX_PTYS: usize = 1 << 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveInfo {
    pub uid: u32,
    pub gid: u32,
    pub perms: u32,
}

impl Default for SlaveInfo {
    fn default() -> Self {
        SlaveInfo {
            uid: unsafe { libc::geteuid() },
            gid: unsafe { libc::getegid() },
            perms: 0o620,
        }
    }
}

#[derive(Default)]
struct Queue {
    bytes: VecDeque<u8>,
    closed: bool,
}

struct Slot {
    reserved: bool,
    locked: bool,
    packet_mode: bool,
    master_open: bool,
    slave_refcount: u32,
    info: SlaveInfo,
    /// Bytes written by the master, read by the slave.
    to_slave: Queue,
    /// Bytes written by the slave, read by the master.
    to_master: Queue,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            reserved: false,
            locked: true,
            packet_mode: false,
            master_open: false,
            slave_refcount: 0,
            info: SlaveInfo::default(),
            to_slave: Queue::default(),
            to_master: Queue::default(),
        }
    }
}

pub struct PtyTable {
    slots: Mutex<Vec<Slot>>,
    cv: Condvar,
}

impl PtyTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PTYS);
        slots.resize_with(MAX_PTYS, Slot::default);
        PtyTable {
            slots: Mutex::new(slots),
            cv: Condvar::new(),
        }
    }

    /// Reserves the next free `pty_num`, initializes it as a locked slave
    /// paired with an open master, and provisions `/dev/pts/N`.
    pub fn open_master(&self) -> Result<u32, VprocError> {
        let mut slots = self.slots.lock();
        let idx = slots
            .iter()
            .position(|s| !s.reserved)
            .ok_or(VprocError::PtyTableExhausted(MAX_PTYS))?;

        let info = SlaveInfo::default();
        slots[idx] = Slot {
            reserved: true,
            locked: true,
            master_open: true,
            info,
            ..Slot::default()
        };
        drop(slots);

        if let Some(prefix) = path::prefix() {
            devpts::ensure_slave_node(&prefix, idx as u32, info);
        }

        trace!(pty_num = idx, "pty master opened");
        Ok(idx as u32)
    }

    fn slot_mut<'a>(slots: &'a mut [Slot], pty_num: u32) -> Result<&'a mut Slot, VprocError> {
        let idx = pty_num as usize;
        let slot = slots.get_mut(idx).ok_or(VprocError::PtyOutOfRange(pty_num))?;
        if !slot.reserved {
            return Err(VprocError::PtyOutOfRange(pty_num));
        }
        Ok(slot)
    }

    /// Opens the slave side. Fails with `EIO`-equivalent while locked.
    pub fn open_slave(&self, pty_num: u32) -> Result<(), VprocError> {
        let mut slots = self.slots.lock();
        let slot = Self::slot_mut(&mut slots, pty_num)?;
        if slot.locked {
            return Err(VprocError::PtyLocked(pty_num));
        }
        slot.slave_refcount += 1;
        Ok(())
    }

    /// `TIOCSPTLCK`: sets or clears the slave lock flag from the master side.
    pub fn set_lock(&self, pty_num: u32, locked: bool) -> Result<(), VprocError> {
        let mut slots = self.slots.lock();
        Self::slot_mut(&mut slots, pty_num)?.locked = locked;
        Ok(())
    }

    pub fn unlock(&self, pty_num: u32) -> Result<(), VprocError> {
        self.set_lock(pty_num, false)
    }

    /// `TIOCGPTN`: returns the slave's pty number (trivially `pty_num`
    /// itself in this table layout, but kept as its own entry point to
    /// mirror the ioctl surface).
    pub fn slave_pty_number(&self, pty_num: u32) -> Result<u32, VprocError> {
        let mut slots = self.slots.lock();
        Self::slot_mut(&mut slots, pty_num)?;
        Ok(pty_num)
    }

    /// `TIOCPKT`: toggles master packet mode.
    pub fn set_packet_mode(&self, pty_num: u32, enabled: bool) -> Result<(), VprocError> {
        let mut slots = self.slots.lock();
        Self::slot_mut(&mut slots, pty_num)?.packet_mode = enabled;
        Ok(())
    }

    /// `TIOCGPKT`: queries master packet mode.
    pub fn packet_mode(&self, pty_num: u32) -> Result<bool, VprocError> {
        let mut slots = self.slots.lock();
        Ok(Self::slot_mut(&mut slots, pty_num)?.packet_mode)
    }

    pub fn get_slave_info(&self, pty_num: u32) -> Result<SlaveInfo, VprocError> {
        let mut slots = self.slots.lock();
        Ok(Self::slot_mut(&mut slots, pty_num)?.info)
    }

    pub fn set_slave_info(&self, pty_num: u32, info: SlaveInfo) -> Result<(), VprocError> {
        let mut slots = self.slots.lock();
        Self::slot_mut(&mut slots, pty_num)?.info = info;
        drop(slots);

        if let Some(prefix) = path::prefix() {
            devpts::ensure_slave_node(&prefix, pty_num, info);
        }
        Ok(())
    }

    /// Master write: feeds the slave's input queue.
    pub fn write_from_master(&self, pty_num: u32, data: &[u8]) -> Result<usize, VprocError> {
        let mut slots = self.slots.lock();
        let slot = Self::slot_mut(&mut slots, pty_num)?;
        slot.to_slave.bytes.extend(data);
        drop(slots);
        self.cv.notify_all();
        Ok(data.len())
    }

    /// Slave write: feeds the master's input queue symmetrically.
    pub fn write_from_slave(&self, pty_num: u32, data: &[u8]) -> Result<usize, VprocError> {
        let mut slots = self.slots.lock();
        let slot = Self::slot_mut(&mut slots, pty_num)?;
        slot.to_master.bytes.extend(data);
        drop(slots);
        self.cv.notify_all();
        Ok(data.len())
    }

    fn blocking_read(&self, pty_num: u32, buf: &mut [u8], from_master_queue: bool) -> Result<usize, VprocError> {
        let mut slots = self.slots.lock();
        loop {
            {
                let slot = Self::slot_mut(&mut slots, pty_num)?;
                let queue = if from_master_queue { &mut slot.to_master } else { &mut slot.to_slave };
                if !queue.bytes.is_empty() {
                    let n = buf.len().min(queue.bytes.len());
                    for slot_byte in buf.iter_mut().take(n) {
                        *slot_byte = queue.bytes.pop_front().unwrap();
                    }
                    return Ok(n);
                }
                if queue.closed {
                    return Ok(0);
                }
            }
            self.cv.wait(&mut slots);
        }
    }

    pub fn read_slave(&self, pty_num: u32, buf: &mut [u8]) -> Result<usize, VprocError> {
        self.blocking_read(pty_num, buf, false)
    }

    pub fn read_master(&self, pty_num: u32, buf: &mut [u8]) -> Result<usize, VprocError> {
        self.blocking_read(pty_num, buf, true)
    }

    fn hangup_locked(slot: &mut Slot) {
        slot.to_slave.closed = true;
        slot.to_master.closed = true;
    }

    /// Closing the last slave reference hangs up the master's view.
    pub fn close_slave(&self, pty_num: u32) -> Result<(), VprocError> {
        let mut slots = self.slots.lock();
        let slot = Self::slot_mut(&mut slots, pty_num)?;
        slot.slave_refcount = slot.slave_refcount.saturating_sub(1);
        if slot.slave_refcount == 0 {
            Self::hangup_locked(slot);
        }
        drop(slots);
        self.cv.notify_all();
        Ok(())
    }

    /// Master cleanup hangs up the slave, releases the pairing, frees the
    /// slot for reuse, and removes `/dev/pts/N` from the virtualized root.
    pub fn close_master(&self, pty_num: u32) -> Result<(), VprocError> {
        let mut slots = self.slots.lock();
        let slot = Self::slot_mut(&mut slots, pty_num)?;
        Self::hangup_locked(slot);
        slots[pty_num as usize] = Slot::default();
        drop(slots);
        self.cv.notify_all();

        if let Some(prefix) = path::prefix() {
            devpts::remove_slave_node(&prefix, pty_num);
        }
        Ok(())
    }
}

impl Default for PtyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn slave_open_fails_while_locked() {
        let table = PtyTable::new();
        let num = table.open_master().unwrap();
        assert!(matches!(table.open_slave(num), Err(VprocError::PtyLocked(_))));
        table.unlock(num).unwrap();
        table.open_slave(num).unwrap();
    }

    #[test]
    fn out_of_range_pty_num_is_enxio() {
        let table = PtyTable::new();
        assert!(matches!(table.open_slave(5), Err(VprocError::PtyOutOfRange(5))));
    }

    #[test]
    fn open_master_provisions_devpts_node_and_close_removes_it() {
        let dir = std::env::temp_dir().join(format!("vproc-devpts-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        path::set_prefix_for_test(&dir);

        let table = PtyTable::new();
        let num = table.open_master().unwrap();

        let node = dir.join("dev/pts").join(num.to_string());
        assert!(node.exists());
        let perms = std::fs::metadata(&node).unwrap().permissions().mode() & 0o777;
        assert_eq!(perms, 0o620);

        table.close_master(num).unwrap();
        assert!(!node.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn master_write_is_read_by_slave() {
        let table = PtyTable::new();
        let num = table.open_master().unwrap();
        table.unlock(num).unwrap();
        table.open_slave(num).unwrap();

        table.write_from_master(num, b"hi").unwrap();
        let mut buf = [0u8; 2];
        let n = table.read_slave(num, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn closing_master_hangs_up_slave_reads() {
        let table = PtyTable::new();
        let num = table.open_master().unwrap();
        table.unlock(num).unwrap();
        table.open_slave(num).unwrap();

        table.close_master(num).unwrap();
        // slot was reset on close_master; reopening proves it's reusable.
        let reopened = table.open_master().unwrap();
        assert_eq!(reopened, num);
    }
}
