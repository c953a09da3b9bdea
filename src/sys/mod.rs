#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use self::unix::{duration_to_millis, net, Events, Revents, Selector, Waker};
