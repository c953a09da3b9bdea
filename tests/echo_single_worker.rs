mod support;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reactor_core::DEFAULT_HIGH_WATER_MARK;
use support::{wait_until, Hooks, TestServer};

/// Pool of one worker, message handler echoes the buffer straight back;
/// closing from the client side fires connection-down exactly once.
#[test]
fn echoes_and_fires_connection_down_once() {
    let down_count = Arc::new(AtomicUsize::new(0));
    let down_count_for_hook = down_count.clone();

    let hooks = Hooks {
        on_message: Some(Arc::new(|conn, buf, _now| {
            let data = buf.as_slice().to_vec();
            buf.retrieve_all();
            conn.send(&data);
        })),
        on_connection: Some(Arc::new(move |conn| {
            if !conn.connected() {
                down_count_for_hook.fetch_add(1, Ordering::SeqCst);
            }
        })),
        ..Hooks::default()
    };

    let server = TestServer::start(1, DEFAULT_HIGH_WATER_MARK, hooks);

    let mut stream = TcpStream::connect(server.addr()).expect("connect");
    stream.write_all(b"ping\n").expect("write");

    let mut buf = [0u8; 32];
    let mut received = Vec::new();
    while received.len() < 5 {
        let n = stream.read(&mut buf).expect("read");
        assert!(n > 0, "peer closed before echoing the full message");
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"ping\n");

    drop(stream);
    wait_until(Duration::from_secs(2), "connection-down to fire exactly once", || {
        down_count.load(Ordering::SeqCst) == 1
    });

    // Give a misbehaving implementation a moment to double-fire before we
    // declare victory.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(down_count.load(Ordering::SeqCst), 1);

    server.stop();
}
