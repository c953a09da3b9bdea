//! The listening-socket half of the reactor.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};

use crate::endpoint::Endpoint;
use crate::event_loop::EventLoopHandle;
use crate::channel::Channel;
use crate::sys::net;

type NewConnectionHandler = Box<dyn FnMut(RawFd, Endpoint) + Send>;

/// Owns the listening socket on the main loop and hands accepted
/// descriptors off to a callback, typically the server's connection
/// router.
pub struct Acceptor {
    loop_handle: EventLoopHandle,
    listen_fd: RawFd,
    channel: Arc<Channel>,
    listening: Mutex<bool>,
    new_connection_handler: Mutex<Option<NewConnectionHandler>>,
}

impl Acceptor {
    /// Binds and wraps a non-blocking listening socket; does not `listen()`.
    pub fn new(
        loop_handle: EventLoopHandle,
        listen_addr: Endpoint,
        reuse_port: bool,
    ) -> std::io::Result<Arc<Acceptor>> {
        let listen_fd = net::new_nonblocking_tcp_socket()?;
        net::set_reuse_addr(listen_fd, true)?;
        if reuse_port {
            net::set_reuse_port(listen_fd, true)?;
        }
        net::bind(listen_fd, listen_addr.to_socket_addr_v4())?;

        let channel = Channel::new(loop_handle.clone(), listen_fd);

        let acceptor = Arc::new_cyclic(|weak: &Weak<Acceptor>| {
            let weak_for_read = weak.clone();
            channel.set_read_callback(move |_now| {
                if let Some(acceptor) = weak_for_read.upgrade() {
                    acceptor.handle_read();
                }
            });

            Acceptor {
                loop_handle,
                listen_fd,
                channel,
                listening: Mutex::new(false),
                new_connection_handler: Mutex::new(None),
            }
        });

        Ok(acceptor)
    }

    pub fn set_new_connection_handler(
        &self,
        handler: impl FnMut(RawFd, Endpoint) + Send + 'static,
    ) {
        *self.new_connection_handler.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn is_listening(&self) -> bool {
        *self.listening.lock().unwrap()
    }

    /// OS `listen()`, then enable read interest.
    pub fn listen(&self) -> std::io::Result<()> {
        self.loop_handle.assert_in_loop_thread();
        *self.listening.lock().unwrap() = true;
        net::listen(self.listen_fd, 1024)?;
        self.channel.enable_read();
        Ok(())
    }

    /// Accept once per readiness notification; level-triggered readiness
    /// means a backlog left behind is simply reported again.
    fn handle_read(&self) {
        self.loop_handle.assert_in_loop_thread();
        match net::accept(self.listen_fd) {
            Ok((conn_fd, peer)) => {
                let peer = Endpoint::from_sockaddr(std::net::SocketAddr::V4(peer));
                let mut handler = self.new_connection_handler.lock().unwrap();
                match handler.as_mut() {
                    Some(handler) => handler(conn_fd, peer),
                    None => net::close(conn_fd),
                }
            }
            Err(err) => {
                if err.raw_os_error() == Some(libc::EMFILE) {
                    // Log and drop; no sentinel-fd recovery.
                    #[cfg(feature = "log")]
                    log::error!("accept failed: per-process descriptor limit reached (EMFILE)");
                } else if err.kind() != std::io::ErrorKind::WouldBlock {
                    #[cfg(feature = "log")]
                    log::error!("accept failed: {err}");
                    #[cfg(not(feature = "log"))]
                    let _ = err;
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.channel.disable_all();
        self.channel.remove();
        net::close(self.listen_fd);
    }
}
