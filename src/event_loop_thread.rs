//! Worker-thread bootstrapping.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::event_loop::{EventLoop, EventLoopHandle};

type InitCallback = Box<dyn FnOnce(&EventLoop) + Send>;

struct Shared {
    loop_handle: Mutex<Option<EventLoopHandle>>,
    ready: Condvar,
}

/// Spawns one worker thread that constructs and runs exactly one
/// `EventLoop` for its whole lifetime.
pub struct EventLoopThread {
    shared: Arc<Shared>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl EventLoopThread {
    pub fn new(name: impl Into<String>) -> EventLoopThread {
        EventLoopThread {
            shared: Arc::new(Shared {
                loop_handle: Mutex::new(None),
                ready: Condvar::new(),
            }),
            join_handle: Mutex::new(None),
            name: name.into(),
        }
    }

    /// Blocks the caller on a condition variable until the worker publishes
    /// its loop, then returns a handle to it.
    pub fn start_loop(&self, init: Option<InitCallback>) -> EventLoopHandle {
        let shared = self.shared.clone();
        let thread_name = self.name.clone();
        let builder = thread::Builder::new().name(thread_name.clone());
        let join_handle = builder
            .spawn(move || {
                let mut event_loop = match EventLoop::new() {
                    Ok(event_loop) => event_loop,
                    Err(err) => {
                        #[cfg(feature = "log")]
                        log::error!("worker thread {thread_name} failed to create its EventLoop: {err}");
                        let _ = err;
                        return;
                    }
                };

                if let Some(init) = init {
                    init(&event_loop);
                }

                {
                    let mut slot = shared.loop_handle.lock().unwrap();
                    *slot = Some(event_loop.handle());
                    shared.ready.notify_one();
                }

                event_loop.run();

                let mut slot = shared.loop_handle.lock().unwrap();
                *slot = None;
            })
            .expect("failed to spawn event loop worker thread");

        *self.join_handle.lock().unwrap() = Some(join_handle);

        let guard = self.shared.loop_handle.lock().unwrap();
        let mut guard = self
            .shared
            .ready
            .wait_while(guard, |slot| slot.is_none())
            .unwrap();
        guard.take().expect("loop handle published by worker")
    }

    pub fn join(&self) {
        if let Some(handle) = self.join_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
