mod support;

use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reactor_core::{TcpConnection, DEFAULT_HIGH_WATER_MARK};
use support::{wait_until, Hooks, TestServer};

/// Two independent foreign threads push to the same connection
/// concurrently; each thread's own messages must still arrive in the order
/// that thread issued them, uncorrupted, however they interleave with the
/// other thread's traffic.
#[test]
fn foreign_thread_sends_preserve_per_thread_order() {
    let connection_slot: Arc<Mutex<Option<Arc<TcpConnection>>>> = Arc::new(Mutex::new(None));
    let connection_slot_for_hook = connection_slot.clone();

    let hooks = Hooks {
        on_connection: Some(Arc::new(move |conn| {
            if conn.connected() {
                *connection_slot_for_hook.lock().unwrap() = Some(conn.clone());
            }
        })),
        ..Hooks::default()
    };

    let server = TestServer::start(1, DEFAULT_HIGH_WATER_MARK, hooks);
    let mut stream = TcpStream::connect(server.addr()).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    wait_until(Duration::from_secs(2), "connection established", || {
        connection_slot.lock().unwrap().is_some()
    });
    let conn = connection_slot.lock().unwrap().clone().unwrap();

    const TICKS: usize = 20;
    const CHATTER: usize = 20;

    let ticker_conn = conn.clone();
    let ticker = std::thread::spawn(move || {
        for i in 0..TICKS {
            ticker_conn.send(format!("tick-{i}\n").as_bytes());
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    let chatter_conn = conn.clone();
    let chatter = std::thread::spawn(move || {
        for i in 0..CHATTER {
            chatter_conn.send(format!("chat-{i}\n").as_bytes());
            std::thread::sleep(Duration::from_millis(3));
        }
    });

    ticker.join().unwrap();
    chatter.join().unwrap();

    let expected_bytes: usize = (0..TICKS).map(|i| format!("tick-{i}\n").len()).sum::<usize>()
        + (0..CHATTER).map(|i| format!("chat-{i}\n").len()).sum::<usize>();

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while received.len() < expected_bytes {
        let n = stream.read(&mut buf).expect("read");
        assert!(n > 0, "peer closed before all sends arrived");
        received.extend_from_slice(&buf[..n]);
    }

    let text = String::from_utf8(received).expect("no corrupted bytes");
    let lines: Vec<&str> = text.lines().collect();

    let tick_seq: Vec<usize> = lines
        .iter()
        .filter_map(|l| l.strip_prefix("tick-"))
        .map(|n| n.parse().unwrap())
        .collect();
    let chat_seq: Vec<usize> = lines
        .iter()
        .filter_map(|l| l.strip_prefix("chat-"))
        .map(|n| n.parse().unwrap())
        .collect();

    assert_eq!(tick_seq, (0..TICKS).collect::<Vec<_>>());
    assert_eq!(chat_seq, (0..CHATTER).collect::<Vec<_>>());

    server.stop();
}
