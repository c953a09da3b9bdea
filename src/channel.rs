use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};

use crate::event_loop::EventLoopHandle;
use crate::interest::Interest;
use crate::sys::Revents;
use crate::timestamp::Timestamp;

/// A `Channel`'s registration state in the multiplexer.
///
/// Driven exclusively by `Multiplexer::update`/`remove`, never set directly
/// by `Channel` itself.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RegState {
    New,
    Added,
    Deleted,
}

type EventCallback = Box<dyn FnMut() + Send>;
type ReadCallback = Box<dyn FnMut(Timestamp) + Send>;

struct ChannelState {
    interest: Interest,
    revents: Revents,
    reg_state: RegState,
    read_cb: Option<ReadCallback>,
    write_cb: Option<EventCallback>,
    close_cb: Option<EventCallback>,
    error_cb: Option<EventCallback>,
}

/// The binding of one file descriptor to its requested/observed event mask
/// and handlers in one `EventLoop`.
///
/// A `Channel` never owns its `fd`; the host (`Acceptor` or `TcpConnection`)
/// closes it. All mutators must run on the owning loop's thread — enforced
/// by `EventLoopHandle::assert_in_loop_thread` at the call site inside
/// `update_channel`/`remove_channel`.
pub struct Channel {
    loop_handle: EventLoopHandle,
    fd: RawFd,
    state: Mutex<ChannelState>,
    /// Weak back-reference to the host object. `None` for channels with no
    /// host that can be destroyed out from under a dispatch (the acceptor's
    /// listening-socket channel lives as long as the server).
    tie: Mutex<Option<Weak<()>>>,
    /// Lets `&self` methods hand the loop an `Arc<Channel>` without every
    /// caller having to thread one through (set once via `Arc::new_cyclic`).
    self_weak: Weak<Channel>,
}

impl Channel {
    pub fn new(loop_handle: EventLoopHandle, fd: RawFd) -> Arc<Channel> {
        Arc::new_cyclic(|weak: &Weak<Channel>| Channel {
            loop_handle,
            fd,
            state: Mutex::new(ChannelState {
                interest: Interest::NONE,
                revents: Revents::default(),
                reg_state: RegState::New,
                read_cb: None,
                write_cb: None,
                close_cb: None,
                error_cb: None,
            }),
            tie: Mutex::new(None),
            self_weak: weak.clone(),
        })
    }

    fn arc(&self) -> Arc<Channel> {
        self.self_weak
            .upgrade()
            .expect("Channel method called after its own Arc was dropped")
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn owner_loop(&self) -> &EventLoopHandle {
        &self.loop_handle
    }

    pub fn requested_interest(&self) -> Interest {
        self.state.lock().unwrap().interest
    }

    pub fn reg_state(&self) -> RegState {
        self.state.lock().unwrap().reg_state
    }

    pub fn set_reg_state(&self, state: RegState) {
        self.state.lock().unwrap().reg_state = state;
    }

    pub fn set_revents(&self, revents: Revents) {
        self.state.lock().unwrap().revents = revents;
    }

    pub fn is_none_event(&self) -> bool {
        self.state.lock().unwrap().interest.is_none()
    }

    pub fn is_reading(&self) -> bool {
        self.state.lock().unwrap().interest.is_readable()
    }

    pub fn is_writing(&self) -> bool {
        self.state.lock().unwrap().interest.is_writable()
    }

    pub fn set_read_callback(&self, cb: impl FnMut(Timestamp) + Send + 'static) {
        self.state.lock().unwrap().read_cb = Some(Box::new(cb));
    }

    pub fn set_write_callback(&self, cb: impl FnMut() + Send + 'static) {
        self.state.lock().unwrap().write_cb = Some(Box::new(cb));
    }

    pub fn set_close_callback(&self, cb: impl FnMut() + Send + 'static) {
        self.state.lock().unwrap().close_cb = Some(Box::new(cb));
    }

    pub fn set_error_callback(&self, cb: impl FnMut() + Send + 'static) {
        self.state.lock().unwrap().error_cb = Some(Box::new(cb));
    }

    /// Attaches a weak back-reference to the host object. `handle_event`
    /// upgrades this before dispatching; a dead host skips dispatch
    /// entirely.
    pub fn tie(&self, guard: &Arc<()>) {
        *self.tie.lock().unwrap() = Some(Arc::downgrade(guard));
    }

    fn update(&self) {
        self.loop_handle.update_channel(self.arc());
    }

    pub fn enable_read(&self) {
        self.state.lock().unwrap().interest |= Interest::READABLE;
        self.update();
    }

    pub fn disable_read(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.interest = state.interest.with_readable(false);
        }
        self.update();
    }

    pub fn enable_write(&self) {
        self.state.lock().unwrap().interest |= Interest::WRITABLE;
        self.update();
    }

    pub fn disable_write(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.interest = state.interest.with_writable(false);
        }
        self.update();
    }

    pub fn disable_all(&self) {
        self.state.lock().unwrap().interest = Interest::NONE;
        self.update();
    }

    pub fn remove(&self) {
        self.loop_handle.remove_channel(self.arc());
    }

    /// Dispatches the handlers for the last-observed readiness, in the
    /// fixed order: close, error, read, write.
    pub fn handle_event(&self, now: Timestamp) {
        let tie = self.tie.lock().unwrap().clone();
        match tie {
            Some(weak) => {
                if let Some(guard) = weak.upgrade() {
                    self.handle_event_with_guard(now);
                    drop(guard);
                }
                // Upgrade failed: host is gone, skip dispatch.
            }
            None => self.handle_event_with_guard(now),
        }
    }

    /// Each callback is taken out of its `Option` before being invoked, so
    /// `self.state`'s lock is not held across the call — a callback is free
    /// to re-enter this `Channel` (e.g. `disable_all`/`enable_write`) without
    /// deadlocking. The callback is put back afterwards unless the call
    /// itself installed a new one.
    fn handle_event_with_guard(&self, now: Timestamp) {
        let revents = self.state.lock().unwrap().revents;

        if revents.is_hup() && !revents.is_readable() {
            if let Some(mut cb) = self.state.lock().unwrap().close_cb.take() {
                cb();
                self.state.lock().unwrap().close_cb.get_or_insert(cb);
            }
            return;
        }

        if revents.is_error() {
            if let Some(mut cb) = self.state.lock().unwrap().error_cb.take() {
                cb();
                self.state.lock().unwrap().error_cb.get_or_insert(cb);
            }
        }

        if revents.is_readable() {
            if let Some(mut cb) = self.state.lock().unwrap().read_cb.take() {
                cb(now);
                self.state.lock().unwrap().read_cb.get_or_insert(cb);
            }
        }

        if revents.is_writable() {
            if let Some(mut cb) = self.state.lock().unwrap().write_cb.take() {
                cb();
                self.state.lock().unwrap().write_cb.get_or_insert(cb);
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("fd", &self.fd).finish()
    }
}
