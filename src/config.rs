//! Configuration knobs.

use std::time::Duration;

/// `EventLoop::run`'s default `poll` upper bound: caps wakeup latency if a
/// task somehow bypasses the queue's own wakeup call.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// The `MUDUO_USE_POLL`-equivalent switch. Read at `Multiplexer`
/// construction time; this implementation ships only the epoll-equivalent
/// backend, so the variable is a documented no-op — reading it just lets a
/// host confirm it was considered.
const USE_POLL_ENV_VAR: &str = "REACTOR_CORE_USE_POLL";

pub fn poll_backend_requested() -> bool {
    std::env::var_os(USE_POLL_ENV_VAR).is_some()
}
