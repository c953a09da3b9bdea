mod support;

use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reactor_core::{ConnState, TcpConnection};
use support::{shrink_recv_buffer, wait_until, Hooks, TestServer};

/// `shutdown()` while a send is still half-drained — the peer must still
/// receive every queued byte before seeing EOF, and the connection must
/// pass through DISCONNECTING before DISCONNECTED.
#[test]
fn shutdown_drains_output_before_closing() {
    let connection_slot: Arc<Mutex<Option<Arc<TcpConnection>>>> = Arc::new(Mutex::new(None));
    let connection_slot_for_hook = connection_slot.clone();
    let observed_disconnecting = Arc::new(Mutex::new(false));
    let observed_disconnecting_for_poll = observed_disconnecting.clone();

    let hooks = Hooks {
        on_connection: Some(Arc::new(move |conn| {
            if conn.connected() {
                *connection_slot_for_hook.lock().unwrap() = Some(conn.clone());
            }
        })),
        ..Hooks::default()
    };

    let server = TestServer::start(1, reactor_core::DEFAULT_HIGH_WATER_MARK, hooks);

    let mut stream = TcpStream::connect(server.addr()).expect("connect");
    shrink_recv_buffer(&stream);

    wait_until(Duration::from_secs(2), "connection established", || {
        connection_slot.lock().unwrap().is_some()
    });
    let conn = connection_slot.lock().unwrap().clone().unwrap();
    assert_eq!(conn.state(), ConnState::Connected);

    let payload = vec![b'y'; 8192];
    conn.send(&payload);
    conn.shutdown();

    // Sample state while the peer is still not reading, trying to catch
    // DISCONNECTING before the output buffer fully drains.
    let conn_for_poll = conn.clone();
    let poll_handle = std::thread::spawn(move || {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if conn_for_poll.state() == ConnState::Disconnecting {
                *observed_disconnecting_for_poll.lock().unwrap() = true;
                break;
            }
            if conn_for_poll.state() == ConnState::Disconnected {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    });

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).expect("read");
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received.len(), payload.len(), "every queued byte must reach the peer");
    assert!(received.iter().all(|&b| b == b'y'));

    poll_handle.join().ok();
    assert!(
        *observed_disconnecting.lock().unwrap(),
        "expected to observe ConnState::Disconnecting before Disconnected"
    );

    // The server only half-closed (shutdown(WR)); it won't see handle_close
    // until the peer closes its end too.
    drop(stream);
    wait_until(Duration::from_secs(2), "connection reaches Disconnected", || {
        conn.state() == ConnState::Disconnected
    });

    server.stop();
}
