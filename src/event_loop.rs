//! The single-threaded cooperative scheduler.

use std::cell::Cell;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::channel::Channel;
use crate::config;
use crate::fatal::fatal_msg;
use crate::poll::{EpollMultiplexer, Multiplexer};
use crate::sys::Waker;

type PendingTask = Box<dyn FnOnce() + Send>;

thread_local! {
    static LOOP_EXISTS_ON_THIS_THREAD: Cell<bool> = Cell::new(false);
}

struct Inner {
    thread_id: ThreadId,
    multiplexer: Mutex<EpollMultiplexer>,
    tasks: Mutex<Vec<PendingTask>>,
    waker: Waker,
    looping: AtomicBool,
    quit: AtomicBool,
    calling_pending_tasks: AtomicBool,
    poll_timeout: Duration,
}

/// A clonable, `Send + Sync` handle to an `EventLoop`, held by `Channel`s,
/// `TcpConnection`s, and anything else that needs to schedule work on a
/// loop it may not own the thread of.
#[derive(Clone)]
pub struct EventLoopHandle(Arc<Inner>);

impl EventLoopHandle {
    pub fn in_loop_thread(&self) -> bool {
        thread::current().id() == self.0.thread_id
    }

    pub fn assert_in_loop_thread(&self) {
        if !self.in_loop_thread() {
            fatal_msg("EventLoop method called from a thread that does not own the loop");
        }
    }

    /// Runs `task` immediately if already on the owning thread, otherwise
    /// queues it.
    pub fn run_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.in_loop_thread() {
            task();
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Always queues `task`; wakes the loop when the caller is foreign or
    /// when we are mid-drain, so a task
    /// enqueued from within another task is guaranteed to run on the next
    /// iteration rather than being delayed indefinitely.
    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let foreign = !self.in_loop_thread();
        let should_wake = {
            let mut tasks = self.0.tasks.lock().unwrap();
            tasks.push(Box::new(task));
            foreign || self.0.calling_pending_tasks.load(Ordering::SeqCst)
        };
        if should_wake {
            self.wake();
        }
    }

    /// Wakes the loop. A short write is a logged error, never fatal.
    pub fn wake(&self) {
        if let Err(err) = self.0.waker.wake() {
            #[cfg(feature = "log")]
            log::error!("failed to wake event loop: {err}");
            #[cfg(not(feature = "log"))]
            let _ = err;
        }
    }

    pub fn quit(&self) {
        self.0.quit.store(true, Ordering::SeqCst);
        if !self.in_loop_thread() {
            self.wake();
        }
    }

    pub fn update_channel(&self, channel: Arc<Channel>) {
        self.assert_in_loop_thread();
        self.0.multiplexer.lock().unwrap().update(&channel);
    }

    pub fn remove_channel(&self, channel: Arc<Channel>) {
        self.assert_in_loop_thread();
        self.0.multiplexer.lock().unwrap().remove(&channel);
    }

    pub fn has_channel(&self, channel: &Arc<Channel>) -> bool {
        self.0.multiplexer.lock().unwrap().has(channel)
    }

    pub fn is_looping(&self) -> bool {
        self.0.looping.load(Ordering::SeqCst)
    }
}

/// One reactor loop, pinned to the OS thread that constructs it for its
/// entire lifetime.
pub struct EventLoop {
    handle: EventLoopHandle,
    active_channels: Vec<Arc<Channel>>,
    wakeup_channel: Arc<Channel>,
}

impl EventLoop {
    pub fn new() -> std::io::Result<EventLoop> {
        EventLoop::with_poll_timeout(config::DEFAULT_POLL_TIMEOUT)
    }

    pub fn with_poll_timeout(poll_timeout: Duration) -> std::io::Result<EventLoop> {
        LOOP_EXISTS_ON_THIS_THREAD.with(|exists| {
            if exists.get() {
                fatal_msg("a second EventLoop was constructed on a thread that already has one");
            }
            exists.set(true);
        });

        // Documented no-op backend switch.
        let _ = config::poll_backend_requested();

        let multiplexer = EpollMultiplexer::new()?;
        let waker = Waker::new()?;

        let inner = Arc::new(Inner {
            thread_id: thread::current().id(),
            multiplexer: Mutex::new(multiplexer),
            tasks: Mutex::new(Vec::new()),
            waker,
            looping: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            calling_pending_tasks: AtomicBool::new(false),
            poll_timeout,
        });
        let handle = EventLoopHandle(inner);

        let waker_fd = handle.0.waker.as_raw_fd();
        let wakeup_channel = Channel::new(handle.clone(), waker_fd);
        let drain_handle = handle.clone();
        wakeup_channel.set_read_callback(move |_now| {
            let _ = drain_handle.0.waker.drain();
        });
        wakeup_channel.enable_read();

        Ok(EventLoop {
            handle,
            active_channels: Vec::new(),
            wakeup_channel,
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// Blocks in `poll`, dispatches ready channels in the order the
    /// multiplexer returned them, then drains pending tasks.
    pub fn run(&mut self) {
        self.handle.assert_in_loop_thread();
        self.handle.0.looping.store(true, Ordering::SeqCst);
        self.handle.0.quit.store(false, Ordering::SeqCst);

        #[cfg(feature = "log")]
        log::trace!("EventLoop {:?} start looping", self.handle.0.thread_id);

        while !self.handle.0.quit.load(Ordering::SeqCst) {
            self.active_channels.clear();

            let poll_result = self
                .handle
                .0
                .multiplexer
                .lock()
                .unwrap()
                .poll(Some(self.handle.0.poll_timeout));

            let (now, ready) = match poll_result {
                Ok(result) => result,
                Err(err) => {
                    #[cfg(feature = "log")]
                    log::error!("poll failed: {err}");
                    #[cfg(not(feature = "log"))]
                    let _ = err;
                    continue;
                }
            };

            self.active_channels.extend(ready);
            for channel in &self.active_channels {
                channel.handle_event(now);
            }

            self.run_pending_tasks();
        }

        self.handle.0.looping.store(false, Ordering::SeqCst);
        #[cfg(feature = "log")]
        log::trace!("EventLoop {:?} stop looping", self.handle.0.thread_id);
    }

    pub fn quit(&self) {
        self.handle.quit();
    }

    pub fn run_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.run_in_loop(task);
    }

    pub fn queue_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.queue_in_loop(task);
    }

    fn run_pending_tasks(&self) {
        self.handle.0.calling_pending_tasks.store(true, Ordering::SeqCst);
        let tasks = {
            let mut guard = self.handle.0.tasks.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            task();
        }
        self.handle.0.calling_pending_tasks.store(false, Ordering::SeqCst);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.wakeup_channel.disable_all();
        self.wakeup_channel.remove();
        LOOP_EXISTS_ON_THIS_THREAD.with(|exists| exists.set(false));
    }
}
