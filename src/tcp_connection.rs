//! Per-connection state machine.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::endpoint::Endpoint;
use crate::event_loop::EventLoopHandle;
use crate::sys::net;
use crate::timestamp::Timestamp;

/// A connection's lifecycle: CONNECTING → CONNECTED → DISCONNECTING →
/// DISCONNECTED.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConnState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

type ConnCallback = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&Arc<TcpConnection>, &mut Buffer, Timestamp) + Send + Sync>;
type HighWaterMarkCallback = Arc<dyn Fn(&Arc<TcpConnection>, usize) + Send + Sync>;

/// Default high-water-mark: 64 MiB of unsent output before an application
/// is asked to throttle.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

/// Bound to exactly one worker loop for its whole life. The
/// server holds a strong reference in its connection map; the Channel holds
/// only a weak one via `tie`, so destroying the server's reference is what
/// actually tears the connection down.
pub struct TcpConnection {
    loop_handle: EventLoopHandle,
    name: String,
    fd: RawFd,
    channel: Arc<Channel>,
    local_addr: Endpoint,
    peer_addr: Endpoint,
    state: Mutex<ConnState>,
    input_buffer: Mutex<Buffer>,
    output_buffer: Mutex<Buffer>,
    high_water_mark: usize,
    connection_cb: Mutex<Option<ConnCallback>>,
    message_cb: Mutex<Option<MessageCallback>>,
    write_complete_cb: Mutex<Option<ConnCallback>>,
    high_water_mark_cb: Mutex<Option<HighWaterMarkCallback>>,
    close_cb: Mutex<Option<ConnCallback>>,
    /// The tie's strong half, kept alive by this struct and downgraded into
    /// the Channel so the Channel never keeps the connection alive on its
    /// own.
    alive: Arc<()>,
    /// Lets `&self` methods obtain an `Arc<TcpConnection>` to hand to the
    /// loop's task queue or a callback (set once via `Arc::new_cyclic`).
    self_weak: Weak<TcpConnection>,
}

impl TcpConnection {
    pub fn new(
        loop_handle: EventLoopHandle,
        name: String,
        fd: RawFd,
        local_addr: Endpoint,
        peer_addr: Endpoint,
    ) -> Arc<TcpConnection> {
        Self::with_high_water_mark(loop_handle, name, fd, local_addr, peer_addr, DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark(
        loop_handle: EventLoopHandle,
        name: String,
        fd: RawFd,
        local_addr: Endpoint,
        peer_addr: Endpoint,
        high_water_mark: usize,
    ) -> Arc<TcpConnection> {
        let channel = Channel::new(loop_handle.clone(), fd);

        if let Err(err) = net::set_keep_alive(fd, true) {
            #[cfg(feature = "log")]
            log::error!("TcpConnection {name} failed to enable SO_KEEPALIVE: {err}");
            #[cfg(not(feature = "log"))]
            let _ = err;
        }

        Arc::new_cyclic(|weak: &Weak<TcpConnection>| {
            wire_channel_callbacks(&channel, weak.clone());

            TcpConnection {
                loop_handle,
                name,
                fd,
                channel,
                local_addr,
                peer_addr,
                state: Mutex::new(ConnState::Connecting),
                input_buffer: Mutex::new(Buffer::new()),
                output_buffer: Mutex::new(Buffer::new()),
                high_water_mark,
                connection_cb: Mutex::new(None),
                message_cb: Mutex::new(None),
                write_complete_cb: Mutex::new(None),
                high_water_mark_cb: Mutex::new(None),
                close_cb: Mutex::new(None),
                alive: Arc::new(()),
                self_weak: weak.clone(),
            }
        })
    }

    fn arc(&self) -> Arc<TcpConnection> {
        self.self_weak
            .upgrade()
            .expect("TcpConnection method called after its own Arc was dropped")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Endpoint {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Endpoint {
        self.peer_addr
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap()
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnState::Connected
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn set_connection_callback(&self, cb: impl Fn(&Arc<TcpConnection>) + Send + Sync + 'static) {
        *self.connection_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_message_callback(
        &self,
        cb: impl Fn(&Arc<TcpConnection>, &mut Buffer, Timestamp) + Send + Sync + 'static,
    ) {
        *self.message_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_write_complete_callback(&self, cb: impl Fn(&Arc<TcpConnection>) + Send + Sync + 'static) {
        *self.write_complete_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_high_water_mark_callback(
        &self,
        cb: impl Fn(&Arc<TcpConnection>, usize) + Send + Sync + 'static,
    ) {
        *self.high_water_mark_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Supplied by the server, not the application: runs after
    /// the connection-down callback and is the server's cue to remove this
    /// connection from its map and schedule `destroy`.
    pub fn set_close_callback(&self, cb: impl Fn(&Arc<TcpConnection>) + Send + Sync + 'static) {
        *self.close_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    /// CONNECTING → CONNECTED.
    pub fn establish(&self) {
        self.loop_handle.assert_in_loop_thread();
        {
            let mut state = self.state.lock().unwrap();
            debug_assert_eq!(*state, ConnState::Connecting);
            *state = ConnState::Connected;
        }
        self.channel.tie(&self.alive);
        self.channel.enable_read();
        if let Some(cb) = self.connection_cb.lock().unwrap().clone() {
            cb(&self.arc());
        }
    }

    /// Callable from any thread; copies the bytes when crossing to the
    /// owning loop so the caller need not keep them alive.
    pub fn send(&self, data: &[u8]) {
        if self.loop_handle.in_loop_thread() {
            self.send_in_loop(data);
        } else {
            let owned = data.to_vec();
            let conn = self.arc();
            self.loop_handle.queue_in_loop(move || conn.send_in_loop(&owned));
        }
    }

    fn send_in_loop(&self, data: &[u8]) {
        self.loop_handle.assert_in_loop_thread();

        if self.state() == ConnState::Disconnected {
            #[cfg(feature = "log")]
            log::error!(
                "TcpConnection {} send() on a disconnected connection, dropping {} bytes",
                self.name,
                data.len()
            );
            return;
        }

        let mut remaining = data;
        let output_was_empty = self.output_buffer.lock().unwrap().is_empty();

        if output_was_empty && !self.channel.is_writing() {
            match net::write(self.fd, data) {
                Ok(n) if n == data.len() => {
                    if let Some(cb) = self.write_complete_cb.lock().unwrap().clone() {
                        let conn = self.arc();
                        self.loop_handle.queue_in_loop(move || cb(&conn));
                    }
                    return;
                }
                Ok(n) => remaining = &data[n..],
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    // Not an error; fall through to the writable-event path.
                }
                Err(err) => {
                    #[cfg(feature = "log")]
                    log::error!("TcpConnection {} write error: {err}", self.name);
                    #[cfg(not(feature = "log"))]
                    let _ = err;
                    return;
                }
            }
        }

        let was_below = self.output_buffer.lock().unwrap().readable_bytes() < self.high_water_mark;
        self.output_buffer.lock().unwrap().append(remaining);
        let readable_now = self.output_buffer.lock().unwrap().readable_bytes();
        let crossed = was_below && readable_now >= self.high_water_mark;

        if crossed {
            if let Some(cb) = self.high_water_mark_cb.lock().unwrap().clone() {
                let conn = self.arc();
                self.loop_handle.queue_in_loop(move || cb(&conn, readable_now));
            }
        }

        if !self.channel.is_writing() {
            self.channel.enable_write();
        }
    }

    /// CONNECTED → DISCONNECTING.
    pub fn shutdown(&self) {
        let conn = self.arc();
        self.loop_handle.run_in_loop(move || {
            {
                let mut state = conn.state.lock().unwrap();
                if *state != ConnState::Connected {
                    return;
                }
                *state = ConnState::Disconnecting;
            }
            conn.shutdown_in_loop();
        });
    }

    fn shutdown_in_loop(&self) {
        self.loop_handle.assert_in_loop_thread();
        if !self.channel.is_writing() {
            let _ = net::shutdown_write(self.fd);
        }
        // else: deferred until handle_write drains the output buffer.
    }

    /// Any state → DISCONNECTED, fires connection-down exactly once.
    pub fn destroy(&self) {
        self.loop_handle.assert_in_loop_thread();
        {
            let mut state = self.state.lock().unwrap();
            if *state == ConnState::Disconnected {
                return;
            }
            *state = ConnState::Disconnected;
        }
        self.channel.disable_all();
        self.channel.remove();
        if let Some(cb) = self.connection_cb.lock().unwrap().clone() {
            cb(&self.arc());
        }
    }

    fn handle_read(&self, now: Timestamp) {
        self.loop_handle.assert_in_loop_thread();
        let n = {
            let mut input = self.input_buffer.lock().unwrap();
            input.read_from_fd(self.fd)
        };
        match n {
            Ok(0) => self.handle_close(),
            Ok(_) => {
                if let Some(cb) = self.message_cb.lock().unwrap().clone() {
                    let conn = self.arc();
                    let mut input = self.input_buffer.lock().unwrap();
                    cb(&conn, &mut input, now);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!("TcpConnection {} read error: {err}", self.name);
                #[cfg(not(feature = "log"))]
                let _ = err;
                self.handle_error();
            }
        }
    }

    fn handle_write(&self) {
        self.loop_handle.assert_in_loop_thread();
        if !self.channel.is_writing() {
            return;
        }

        let result = {
            let mut output = self.output_buffer.lock().unwrap();
            let result = output.write_to_fd(self.fd);
            if let Ok(n) = result {
                output.retrieve(n);
            }
            result
        };

        match result {
            Ok(_) => {
                let output_empty = self.output_buffer.lock().unwrap().is_empty();
                if output_empty {
                    self.channel.disable_write();
                    if let Some(cb) = self.write_complete_cb.lock().unwrap().clone() {
                        let conn = self.arc();
                        self.loop_handle.queue_in_loop(move || cb(&conn));
                    }
                    if self.state() == ConnState::Disconnecting {
                        self.shutdown_in_loop();
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!("TcpConnection {} write error: {err}", self.name);
                #[cfg(not(feature = "log"))]
                let _ = err;
            }
        }
    }

    fn handle_close(&self) {
        self.loop_handle.assert_in_loop_thread();
        {
            let mut state = self.state.lock().unwrap();
            *state = ConnState::Disconnected;
        }
        self.channel.disable_all();

        let conn = self.arc();
        if let Some(cb) = self.connection_cb.lock().unwrap().clone() {
            cb(&conn);
        }
        if let Some(cb) = self.close_cb.lock().unwrap().clone() {
            cb(&conn);
        }
    }

    fn handle_error(&self) {
        #[cfg(feature = "log")]
        log::error!("TcpConnection {} socket error", self.name);
    }
}

fn wire_channel_callbacks(channel: &Arc<Channel>, weak: Weak<TcpConnection>) {
    let w = weak.clone();
    channel.set_read_callback(move |now| {
        if let Some(conn) = w.upgrade() {
            conn.handle_read(now);
        }
    });

    let w = weak.clone();
    channel.set_write_callback(move || {
        if let Some(conn) = w.upgrade() {
            conn.handle_write();
        }
    });

    let w = weak.clone();
    channel.set_close_callback(move || {
        if let Some(conn) = w.upgrade() {
            conn.handle_close();
        }
    });

    let w = weak;
    channel.set_error_callback(move || {
        if let Some(conn) = w.upgrade() {
            conn.handle_error();
        }
    });
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        net::close(self.fd);
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("name", &self.name)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
