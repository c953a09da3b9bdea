//! A small, high-performance, event-driven TCP server reactor built on the
//! "one loop per thread" pattern: one epoll-backed `EventLoop` per OS
//! thread, an `Acceptor` on the main loop handing off connections to a
//! `ThreadPool` of worker loops, each `TcpConnection` pinned to the worker
//! that established it for its whole life.
//!
//! Linux/epoll only — there is no portable fallback.

#[cfg(not(unix))]
compile_error!("reactor-core only supports unix (Linux epoll) targets");

#[cfg(unix)]
mod sys;

mod acceptor;
mod buffer;
mod channel;
mod config;
mod endpoint;
mod event_loop;
mod event_loop_thread;
mod fatal;
mod interest;
mod poll;
mod tcp_connection;
mod thread_pool;
mod timestamp;
mod token;

pub use acceptor::Acceptor;
pub use buffer::{Buffer, PREPEND_SIZE};
pub use channel::{Channel, RegState};
pub use config::DEFAULT_POLL_TIMEOUT;
pub use endpoint::Endpoint;
pub use event_loop::{EventLoop, EventLoopHandle};
pub use event_loop_thread::EventLoopThread;
pub use interest::Interest;
pub use poll::{EpollMultiplexer, Multiplexer};
pub use tcp_connection::{ConnState, TcpConnection, DEFAULT_HIGH_WATER_MARK};
pub use thread_pool::ThreadPool;
pub use timestamp::Timestamp;
pub use token::Token;
