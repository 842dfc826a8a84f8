//! Cooperative input reader: serializes reads from one interactive source
//! (keyboard, pty slave) across every thread of a session so uncoordinated
//! direct reads don't race and drop bytes — the scenario this guards
//! against is a password-prompt thread and a shell read-loop both reading
//! the same fd. Ported from `VProcSessionInput` in §4.4.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::errno::Errno;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Upper bound on buffered-but-unconsumed bytes. The reader stops pulling
/// from the source once the queue is this full; consumers draining it
/// unblock further pumping.
const QUEUE_CAPACITY: usize = 4096;
const PUMP_CHUNK: usize = 256;

struct State {
    buffer: VecDeque<u8>,
    /// True while some thread is the active reader (pulling from `source_fd`
    /// into `buffer`). At most one thread may hold this at a time.
    reader_active: bool,
    stop_requested: bool,
    interrupt_pending: bool,
    eof: bool,
}

pub struct SessionInput {
    source_fd: RawFd,
    state: Mutex<State>,
    cv: Condvar,
}

impl SessionInput {
    pub fn new(source_fd: RawFd) -> Arc<Self> {
        Arc::new(SessionInput {
            source_fd,
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                reader_active: false,
                stop_requested: false,
                interrupt_pending: false,
                eof: false,
            }),
            cv: Condvar::new(),
        })
    }

    /// Pulls one chunk from the underlying source into the shared queue.
    /// Called with `reader_active` already claimed by the caller.
    fn pump(&self) {
        let mut chunk = [0u8; PUMP_CHUNK];
        let outcome = loop {
            match nix::unistd::read(self.source_fd, &mut chunk) {
                Ok(n) => break Some(n),
                Err(Errno::EINTR) => continue,
                Err(_) => break None,
            }
        };

        let mut state = self.state.lock();
        match outcome {
            Some(0) => {
                state.eof = true;
                trace!("session input reached EOF");
            }
            Some(n) => {
                state.buffer.extend(&chunk[..n]);
            }
            None => {
                state.eof = true;
            }
        }
        state.reader_active = false;
        drop(state);
        self.cv.notify_all();
    }

    /// Consumer entry point: blocks until at least one byte is available,
    /// EOF, or stop is requested. Returns `0` only on EOF or stop, never
    /// on a spurious empty read — callers never need to retry themselves.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        loop {
            let mut state = self.state.lock();

            if !state.buffer.is_empty() {
                let n = buf.len().min(state.buffer.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.buffer.pop_front().unwrap();
                }
                return n;
            }

            if state.eof || state.stop_requested {
                return 0;
            }

            if state.buffer.len() >= QUEUE_CAPACITY {
                self.cv.wait(&mut state);
                continue;
            }

            if !state.reader_active {
                state.reader_active = true;
                drop(state);
                self.pump();
                continue;
            }

            self.cv.wait(&mut state);
        }
    }

    pub fn request_interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupt_pending = true;
        self.cv.notify_all();
    }

    pub fn take_interrupt(&self) -> bool {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.interrupt_pending, false)
    }

    /// Requests the active (or next-to-be-active) reader to stop and
    /// blocks until no reader is mid-pump, so the session can be torn
    /// down safely afterward.
    pub fn stop_reader(&self) {
        let mut state = self.state.lock();
        state.stop_requested = true;
        self.cv.notify_all();
        while state.reader_active {
            self.cv.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{pipe, write};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn consumer_reads_bytes_pushed_after_it_starts() {
        let (r, w) = pipe().unwrap();
        let input = SessionInput::new(r);

        let input2 = input.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            write(w, b"hello").unwrap();
        });

        let mut collected = Vec::new();
        while collected.len() < 5 {
            let mut buf = [0u8; 1];
            let n = input.read(&mut buf);
            assert!(n > 0);
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"hello");

        producer.join().unwrap();
        drop(input2);
        let _ = nix::unistd::close(w);
    }

    #[test]
    fn password_prompt_regression_two_pushes() {
        let (r, w) = pipe().unwrap();
        let input = SessionInput::new(r);

        let producer = thread::spawn(move || {
            write(w, b"s").unwrap();
            thread::sleep(Duration::from_millis(20));
            write(w, b"ecret\n").unwrap();
            w
        });

        // Password-read thread: one byte at a time, must not stop after
        // the single 's'.
        let mut collected = Vec::new();
        loop {
            let mut buf = [0u8; 1];
            let n = input.read(&mut buf);
            assert!(n > 0);
            collected.push(buf[0]);
            if buf[0] == b'\n' {
                break;
            }
        }
        assert_eq!(&collected, b"secret\n");

        let w = producer.join().unwrap();
        let _ = nix::unistd::close(w);
    }
}
