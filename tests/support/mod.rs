// Shared by every integration test; not all helpers are used by all of them.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{TcpListener as StdTcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Once};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use reactor_core::{Acceptor, Buffer, Endpoint, EventLoop, EventLoopHandle, TcpConnection, ThreadPool, Timestamp};

static LOG_INIT: Once = Once::new();

pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// Grabs a currently-free loopback port by binding to port 0 and releasing
/// it; good enough for test isolation, same trick most socket test suites
/// use when they can't ask the OS to hold the port open across two binds.
pub fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

/// Polls `cond` until it returns true or `timeout` elapses, sleeping briefly
/// between checks. Panics with `msg` on timeout.
pub fn wait_until(timeout: Duration, msg: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for: {msg}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Shrinks a client socket's receive window so a server-side send of a few
/// KiB outruns it — used by the backpressure and graceful-shutdown tests to
/// force bytes to actually queue in the connection's output buffer instead
/// of draining straight into the kernel.
pub fn shrink_recv_buffer(stream: &TcpStream) {
    let fd = stream.as_raw_fd();
    let size: libc::c_int = 1024;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    assert_eq!(ret, 0, "setsockopt(SO_RCVBUF) failed");
}

pub type ConnMap = Arc<Mutex<HashMap<RawFd, Arc<TcpConnection>>>>;

/// The callbacks a host installs on every `TcpConnection` the server hands
/// it; `TestServer` wires whichever of these are set onto each new
/// connection.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_connection: Option<Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>>,
    pub on_message: Option<Arc<dyn Fn(&Arc<TcpConnection>, &mut Buffer, Timestamp) + Send + Sync>>,
    pub on_write_complete: Option<Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>>,
    pub on_high_water_mark: Option<Arc<dyn Fn(&Arc<TcpConnection>, usize) + Send + Sync>>,
}

struct Started {
    handle: EventLoopHandle,
    pool: Arc<ThreadPool>,
    conns: ConnMap,
}

/// A minimal echo-capable TCP server assembled directly from
/// `reactor_core`'s primitives (`Acceptor` + `ThreadPool` + a connection
/// map) the way a host application would — the crate leaves that
/// composition to the host, so the test suite plays the host's part.
pub struct TestServer {
    pub port: u16,
    pool_size: usize,
    base_handle: EventLoopHandle,
    conns: ConnMap,
    fd_to_worker: Arc<Mutex<HashMap<RawFd, usize>>>,
    join: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(pool_size: usize, high_water_mark: usize, hooks: Hooks) -> TestServer {
        init_logging();
        let port = free_port();
        let fd_to_worker: Arc<Mutex<HashMap<RawFd, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let fd_to_worker_for_thread = fd_to_worker.clone();

        let (ready_tx, ready_rx) = mpsc::channel::<Started>();

        let join = std::thread::Builder::new()
            .name("test-server-base".into())
            .spawn(move || {
                let mut event_loop = EventLoop::new().expect("base EventLoop::new");
                let handle = event_loop.handle();

                let pool = Arc::new(ThreadPool::new(handle.clone(), "test-pool"));
                pool.set_thread_count(pool_size);
                pool.start(None);

                let acceptor =
                    Acceptor::new(handle.clone(), Endpoint::loopback(port), true).expect("Acceptor::new");

                let conns: ConnMap = Arc::new(Mutex::new(HashMap::new()));
                let next_index = Arc::new(AtomicUsize::new(0));

                {
                    let pool = pool.clone();
                    let conns = conns.clone();
                    let hooks = hooks.clone();
                    let next_index = next_index.clone();
                    let fd_to_worker = fd_to_worker_for_thread.clone();
                    let divisor = pool_size.max(1);
                    acceptor.set_new_connection_handler(move |fd, peer| {
                        let worker = pool.get_next_loop();
                        let worker_index = next_index.fetch_add(1, Ordering::SeqCst) % divisor;
                        fd_to_worker.lock().unwrap().insert(fd, worker_index);

                        let conns = conns.clone();
                        let hooks = hooks.clone();
                        let worker_for_task = worker.clone();
                        let local = Endpoint::loopback(port);
                        worker.run_in_loop(move || {
                            let name = format!("test-conn-{fd}");
                            let conn = TcpConnection::with_high_water_mark(
                                worker_for_task,
                                name,
                                fd,
                                local,
                                peer,
                                high_water_mark,
                            );

                            if let Some(cb) = hooks.on_connection.clone() {
                                conn.set_connection_callback(move |c| cb(c));
                            }
                            if let Some(cb) = hooks.on_message.clone() {
                                conn.set_message_callback(move |c, buf, ts| cb(c, buf, ts));
                            }
                            if let Some(cb) = hooks.on_write_complete.clone() {
                                conn.set_write_complete_callback(move |c| cb(c));
                            }
                            if let Some(cb) = hooks.on_high_water_mark.clone() {
                                conn.set_high_water_mark_callback(move |c, n| cb(c, n));
                            }

                            let conns_for_close = conns.clone();
                            conn.set_close_callback(move |c| {
                                conns_for_close.lock().unwrap().remove(&c.fd());
                            });

                            conns.lock().unwrap().insert(fd, conn.clone());
                            conn.establish();
                        });
                    });
                }

                acceptor.listen().expect("Acceptor::listen");

                ready_tx
                    .send(Started {
                        handle: handle.clone(),
                        pool,
                        conns,
                    })
                    .ok();

                event_loop.run();
                // acceptor, pool, and all worker EventLoopThreads are
                // dropped here as this closure returns.
            })
            .expect("spawn base server thread");

        let started = ready_rx.recv().expect("server thread failed to start");

        TestServer {
            port,
            pool_size,
            base_handle: started.handle,
            conns: started.conns,
            fd_to_worker,
            join: Some(join),
        }
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn connection_count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    /// Tallies currently-open connections by the worker index they were
    /// dispatched to (round-robin order at accept time).
    pub fn worker_counts(&self) -> Vec<usize> {
        let conns = self.conns.lock().unwrap();
        let assignment = self.fd_to_worker.lock().unwrap();
        let mut counts = vec![0usize; self.pool_size.max(1)];
        for fd in conns.keys() {
            if let Some(&worker) = assignment.get(fd) {
                counts[worker] += 1;
            }
        }
        counts
    }

    pub fn stop(mut self) {
        self.base_handle.quit();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.base_handle.quit();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
