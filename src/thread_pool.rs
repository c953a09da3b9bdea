//! Round-robin distribution of connections across worker loops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::event_loop::{EventLoop, EventLoopHandle};
use crate::event_loop_thread::EventLoopThread;

type InitCallback = Box<dyn FnOnce(&EventLoop) + Send>;

/// With `N = 0`, `get_next_loop()` falls back to the base loop, so all
/// connections run on the main loop.
pub struct ThreadPool {
    base_loop: EventLoopHandle,
    name: String,
    thread_count: Mutex<usize>,
    threads: Mutex<Vec<EventLoopThread>>,
    loops: Mutex<Vec<EventLoopHandle>>,
    next: AtomicUsize,
    started: Mutex<bool>,
}

impl ThreadPool {
    pub fn new(base_loop: EventLoopHandle, name: impl Into<String>) -> ThreadPool {
        ThreadPool {
            base_loop,
            name: name.into(),
            thread_count: Mutex::new(0),
            threads: Mutex::new(Vec::new()),
            loops: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
            started: Mutex::new(false),
        }
    }

    pub fn set_thread_count(&self, n: usize) {
        *self.thread_count.lock().unwrap() = n;
    }

    /// Spawns `N` `EventLoopThread`s, optionally running `init` on each
    /// worker's loop just before it starts running.
    pub fn start(&self, init: Option<std::sync::Arc<dyn Fn(&EventLoop) + Send + Sync>>) {
        let mut started = self.started.lock().unwrap();
        if *started {
            return;
        }
        *started = true;

        let n = *self.thread_count.lock().unwrap();
        let mut threads = self.threads.lock().unwrap();
        let mut loops = self.loops.lock().unwrap();

        for i in 0..n {
            let thread_name = format!("{}-{}", self.name, i);
            let thread = EventLoopThread::new(thread_name);
            let per_thread_init: Option<InitCallback> = init.clone().map(|shared_init| {
                let cb: InitCallback = Box::new(move |event_loop: &EventLoop| shared_init(event_loop));
                cb
            });
            let handle = thread.start_loop(per_thread_init);
            loops.push(handle);
            threads.push(thread);
        }
    }

    /// Round-robins over the started worker loops, or the base loop if none
    /// were started.
    pub fn get_next_loop(&self) -> EventLoopHandle {
        let loops = self.loops.lock().unwrap();
        if loops.is_empty() {
            return self.base_loop.clone();
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % loops.len();
        loops[index].clone()
    }

    pub fn all_loops(&self) -> Vec<EventLoopHandle> {
        let loops = self.loops.lock().unwrap();
        if loops.is_empty() {
            vec![self.base_loop.clone()]
        } else {
            loops.clone()
        }
    }
}
