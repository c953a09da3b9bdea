//! The read/write byte buffer.

use std::os::unix::io::RawFd;

/// Bytes reserved at the front so a caller can cheaply prepend a length
/// header after the fact, without shifting the already-buffered payload.
pub const PREPEND_SIZE: usize = 8;

const INITIAL_SIZE: usize = 1024;
/// Stack scratch used by `read_from_fd`'s scatter read: large enough that a
/// single syscall absorbs any burst, however small the buffer's own
/// writable region currently is.
const SCRATCH_SIZE: usize = 65536;

/// A growable buffer with three regions: `[0, reader)` prepend space,
/// `[reader, writer)` readable payload, `[writer, capacity)` writable
/// suffix. Invariant: `PREPEND_SIZE ≤ reader ≤ writer ≤ capacity`, always.
#[derive(Clone, Debug)]
pub struct Buffer {
    data: Vec<u8>,
    reader: usize,
    writer: usize,
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(initial_size: usize) -> Buffer {
        let capacity = PREPEND_SIZE + initial_size;
        Buffer {
            data: vec![0u8; capacity],
            reader: PREPEND_SIZE,
            writer: PREPEND_SIZE,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.writer
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader
    }

    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.reader..self.writer]
    }

    /// Ensures room, then copies `bytes` in.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let end = self.writer + bytes.len();
        self.data[self.writer..end].copy_from_slice(bytes);
        self.writer = end;
    }

    /// Compacts in place if the combined writable + reclaimable-prepend
    /// space suffices; otherwise grows so `writable == len` at minimum.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }
        if self.writable_bytes() + (self.prependable_bytes() - PREPEND_SIZE) >= len {
            self.compact();
        } else {
            let needed = self.writer + len;
            self.data.resize(needed, 0);
        }
    }

    fn compact(&mut self) {
        let readable = self.readable_bytes();
        self.data.copy_within(self.reader..self.writer, PREPEND_SIZE);
        self.reader = PREPEND_SIZE;
        self.writer = PREPEND_SIZE + readable;
    }

    /// Advances the reader; resets both indices to the prepend reserve once
    /// the buffer is fully drained.
    pub fn retrieve(&mut self, len: usize) {
        let len = len.min(self.readable_bytes());
        self.reader += len;
        if self.reader == self.writer {
            self.reader = PREPEND_SIZE;
            self.writer = PREPEND_SIZE;
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader = PREPEND_SIZE;
        self.writer = PREPEND_SIZE;
    }

    /// Copies out up to `len` bytes as a lossy UTF-8 string, then retrieves.
    pub fn retrieve_as_string(&mut self, len: usize) -> String {
        let len = len.min(self.readable_bytes());
        let s = String::from_utf8_lossy(&self.data[self.reader..self.reader + len]).into_owned();
        self.retrieve(len);
        s
    }

    pub fn retrieve_all_as_string(&mut self) -> String {
        let len = self.readable_bytes();
        self.retrieve_as_string(len)
    }

    /// A scatter read into the writable region plus a 64 KiB stack scratch,
    /// so one syscall absorbs any burst regardless of how little room the
    /// buffer currently has.
    pub fn read_from_fd(&mut self, fd: RawFd) -> std::io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.data[self.writer..].as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: scratch.as_mut_ptr() as *mut libc::c_void,
                iov_len: scratch.len(),
            },
        ];
        let iov_count = if writable < scratch.len() { 2 } else { 1 };

        let n = crate::sys::net::readv(fd, &mut iov[..iov_count])?;

        if n <= writable {
            self.writer += n;
        } else {
            self.writer = self.data.len();
            let overflow = n - writable;
            self.append(&scratch[..overflow]);
        }
        Ok(n)
    }

    /// A single write from the readable region; short writes are the
    /// caller's problem.
    pub fn write_to_fd(&mut self, fd: RawFd) -> std::io::Result<usize> {
        crate::sys::net::write(fd, self.as_slice())
    }
}
