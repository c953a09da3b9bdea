use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{cmp, io};

use crate::interest::Interest;

/// Thin wrapper over `epoll_create1`/`epoll_ctl`/`epoll_wait`.
///
/// This is the only place `libc::epoll_*` is called from; everything above
/// this module talks in terms of [`crate::channel::Channel`] and
/// [`Interest`], never raw `epoll_event`s.
#[derive(Debug)]
pub struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        // SAFETY: `epoll_create1` returned a valid, owned fd.
        let ep = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Selector { ep })
    }

    pub fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)).map(drop)
    }

    pub fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)).map(drop)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // The event argument is ignored by the kernel for EPOLL_CTL_DEL on
        // modern Linux, but older kernels require a non-null pointer.
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut event)).map(drop)
    }

    /// Waits for events, writing them into `events`. Returns the number of
    /// events filled in. `timeout_ms < 0` waits indefinitely.
    pub fn select(&self, events: &mut Events, timeout_ms: i64) -> io::Result<usize> {
        let timeout = if timeout_ms < 0 {
            -1
        } else {
            cmp::min(timeout_ms, i32::MAX as i64) as i32
        };
        events.raw.clear();
        let cap = events.raw.capacity();
        let n = match syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.raw.as_mut_ptr(),
            cap as i32,
            timeout as libc::c_int,
        )) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                // EINTR is silently retried on the next loop iteration, so
                // we report "nothing happened" rather than propagating the
                // error.
                0
            }
            Err(err) => return Err(err),
        };
        // SAFETY: epoll_wait guarantees the first `n` slots were written.
        unsafe { events.raw.set_len(n as usize) };
        Ok(n as usize)
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let mut kind: libc::c_int = 0;
    if interest.is_readable() {
        kind |= libc::EPOLLIN | libc::EPOLLPRI;
    }
    if interest.is_writable() {
        kind |= libc::EPOLLOUT;
    }
    kind as u32
}

/// Readiness actually reported by the kernel for one descriptor: readable,
/// writable, a hang-up, or an error. Distinct from [`Interest`], which is
/// only ever read/write — the dispatch order distinguishes HUP/ERR from
/// the plain readable/writable bits the caller asked for.
#[derive(Copy, Clone, Eq, PartialEq, Default, Debug)]
pub struct Revents(u8);

const R_READABLE: u8 = 0b0001;
const R_WRITABLE: u8 = 0b0010;
const R_HUP: u8 = 0b0100;
const R_ERROR: u8 = 0b1000;

impl Revents {
    pub fn is_readable(self) -> bool {
        self.0 & R_READABLE != 0
    }
    pub fn is_writable(self) -> bool {
        self.0 & R_WRITABLE != 0
    }
    pub fn is_hup(self) -> bool {
        self.0 & R_HUP != 0
    }
    pub fn is_error(self) -> bool {
        self.0 & R_ERROR != 0
    }

    fn from_epoll(raw: u32) -> Revents {
        let raw = raw as libc::c_int;
        let mut bits = 0u8;
        if raw & (libc::EPOLLIN | libc::EPOLLPRI) != 0 {
            bits |= R_READABLE;
        }
        if raw & libc::EPOLLOUT != 0 {
            bits |= R_WRITABLE;
        }
        if raw & libc::EPOLLHUP != 0 {
            bits |= R_HUP;
        }
        if raw & libc::EPOLLERR != 0 {
            bits |= R_ERROR;
        }
        Revents(bits)
    }
}

/// Growable buffer of raw epoll events, doubling in capacity whenever a
/// `epoll_wait` call fills it completely.
#[derive(Debug)]
pub struct Events {
    raw: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            raw: Vec::with_capacity(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    pub fn grow(&mut self) {
        let additional = self.raw.capacity().max(1);
        self.raw.reserve(additional);
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Revents)> + '_ {
        self.raw
            .iter()
            .map(|e| (e.u64, Revents::from_epoll(e.events)))
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Blocks until data is available on one of the given durations has elapsed.
/// Kept tiny and separate from `Selector` so tests can construct a bare
/// epoll set without the rest of the reactor.
pub fn duration_to_millis(d: Option<Duration>) -> i64 {
    match d {
        None => -1,
        Some(d) => {
            let millis = d.as_millis();
            if millis > i64::MAX as u128 {
                i64::MAX
            } else {
                millis as i64
            }
        }
    }
}
