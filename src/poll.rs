//! The `Multiplexer` contract and its epoll-backed implementation.
//! Everything above this module talks to channels through
//! `update`/`remove`/`has`/`poll`; nothing above it knows `epoll_event`
//! exists.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{Channel, RegState};
use crate::fatal::fatal;
use crate::sys::{self, Events, Selector};
use crate::timestamp::Timestamp;
use crate::token::Token;

/// The raw fd doubles as its own registration token; wrapping it in a
/// `Token` before handing it to the selector keeps the epoll-facing API in
/// terms of an opaque identifier rather than a bare `u64`, the way
/// `mio::Token` does at its own selector boundary.
fn token_for(fd: RawFd) -> Token {
    Token(fd as usize)
}

/// The only operations the reactor core needs from an OS readiness facility.
pub trait Multiplexer {
    /// Blocks up to `timeout` (`None` = wait indefinitely), returning the
    /// wall-clock reading taken immediately after the kernel call and the
    /// channels that are now ready (each already carrying its observed
    /// `Revents` from this call).
    fn poll(&mut self, timeout: Option<Duration>) -> std::io::Result<(Timestamp, Vec<Arc<Channel>>)>;

    /// Reconciles the backend's view of `channel` with its current
    /// requested mask and registration state.
    fn update(&mut self, channel: &Arc<Channel>);

    /// Untracks a channel; the caller guarantees it will not be dispatched
    /// afterwards.
    fn remove(&mut self, channel: &Arc<Channel>);

    /// Tests whether `channel` is currently tracked.
    fn has(&self, channel: &Arc<Channel>) -> bool;
}

/// Level-triggered epoll backend. The only backend this crate ships; the
/// `poll(2)`-equivalent environment switch is accepted but treated as a
/// no-op (see [`crate::config`]).
pub struct EpollMultiplexer {
    selector: Selector,
    events: Events,
    channels: HashMap<RawFd, Arc<Channel>>,
}

const INITIAL_EVENT_CAPACITY: usize = 16;

impl EpollMultiplexer {
    pub fn new() -> std::io::Result<EpollMultiplexer> {
        Ok(EpollMultiplexer {
            selector: Selector::new()?,
            events: Events::with_capacity(INITIAL_EVENT_CAPACITY),
            channels: HashMap::new(),
        })
    }
}

impl Multiplexer for EpollMultiplexer {
    fn poll(&mut self, timeout: Option<Duration>) -> std::io::Result<(Timestamp, Vec<Arc<Channel>>)> {
        let timeout_ms = sys::duration_to_millis(timeout);
        let n = self.selector.select(&mut self.events, timeout_ms)?;
        let now = Timestamp::now();

        let mut ready = Vec::with_capacity(n);
        for (token, revents) in self.events.iter() {
            let fd = Token::from(token as usize).0 as RawFd;
            if let Some(channel) = self.channels.get(&fd) {
                channel.set_revents(revents);
                ready.push(channel.clone());
            }
        }

        // If the returned-event list fills the current capacity, double it
        // before the next call — the list was likely truncated.
        if n == self.events.capacity() {
            self.events.grow();
        }

        Ok((now, ready))
    }

    fn update(&mut self, channel: &Arc<Channel>) {
        let fd = channel.fd();
        let mask = channel.requested_interest();
        let state = channel.reg_state();

        match state {
            RegState::New => {
                self.channels.insert(fd, channel.clone());
                if mask.is_none() {
                    // A freshly-constructed channel with no requested events
                    // moves straight to DELETED without ever touching
                    // epoll_ctl, since there is nothing to register yet.
                    channel.set_reg_state(RegState::Deleted);
                } else {
                    if let Err(err) = self.selector.register(fd, token_for(fd).0 as u64, mask) {
                        fatal("epoll_ctl(ADD) failed", err);
                    }
                    channel.set_reg_state(RegState::Added);
                }
            }
            RegState::Added => {
                if mask.is_none() {
                    if let Err(err) = self.selector.deregister(fd) {
                        fatal("epoll_ctl(DEL) failed", err);
                    }
                    channel.set_reg_state(RegState::Deleted);
                } else if let Err(err) = self.selector.reregister(fd, token_for(fd).0 as u64, mask) {
                    fatal("epoll_ctl(MOD) failed", err);
                }
            }
            RegState::Deleted => {
                if !mask.is_none() {
                    if let Err(err) = self.selector.register(fd, token_for(fd).0 as u64, mask) {
                        fatal("epoll_ctl(ADD) failed", err);
                    }
                    channel.set_reg_state(RegState::Added);
                }
                // mask == 0 while DELETED: no-op, per the transition table.
            }
        }
    }

    fn remove(&mut self, channel: &Arc<Channel>) {
        let fd = channel.fd();
        let state = channel.reg_state();
        self.channels.remove(&fd);
        if state == RegState::Added {
            // Best-effort: the fd may already be closed by the caller.
            let _ = self.selector.deregister(fd);
        }
        channel.set_reg_state(RegState::New);
    }

    fn has(&self, channel: &Arc<Channel>) -> bool {
        self.channels.contains_key(&channel.fd())
    }
}
