#[macro_use]
mod macros;

pub mod net;
mod selector;
mod waker;

pub use selector::{duration_to_millis, Events, Revents, Selector};
pub use waker::Waker;
