use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

/// The "self-pipe" wakeup descriptor: an eventfd counter. A single 8-byte
/// write of `1` makes the multiplexer return; a single 8-byte read drains
/// (and resets) the counter.
#[derive(Debug)]
pub struct Waker {
    fd: File,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        let raw = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        // SAFETY: eventfd(2) returned a fresh, owned fd.
        let fd = unsafe { File::from_raw_fd(raw) };
        Ok(Waker { fd })
    }

    /// Wakes the loop blocked in `poll`: writes one 8-byte `1`.
    pub fn wake(&self) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(8) => Ok(()),
            Ok(n) => {
                log_short_io("wake", n, 8);
                Ok(())
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // The eventfd counter is about to overflow; drain it and
                // retry once, as mio's eventfd waker does.
                self.drain();
                self.wake()
            }
            Err(e) => Err(e),
        }
    }

    /// `EventLoop::handle_read()` on the wakeup channel: drain the counter
    /// back to zero so the readable condition clears (level-triggered).
    pub fn drain(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        match (&self.fd).read(&mut buf) {
            Ok(8) => Ok(u64::from_ne_bytes(buf)),
            Ok(n) => {
                log_short_io("handle_read", n, 8);
                Ok(0)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

fn log_short_io(op: &str, got: usize, want: usize) {
    #[cfg(feature = "log")]
    log::error!("wakeup fd {op}() transferred {got} bytes instead of {want}");
    #[cfg(not(feature = "log"))]
    let _ = (op, got, want);
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
