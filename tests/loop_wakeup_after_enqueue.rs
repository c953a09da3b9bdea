use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reactor_core::{EventLoop, EventLoopHandle};

/// A foreign thread's `queue_in_loop` must wake a loop that is blocked in
/// `poll` with no registered channels — the task runs within milliseconds,
/// not after the default 10-second poll timeout.
#[test]
fn queue_in_loop_wakes_a_blocked_loop_promptly() {
    let (ready_tx, ready_rx) = mpsc::channel::<EventLoopHandle>();

    let thread = std::thread::spawn(move || {
        // An EventLoop must be both constructed and run on the same OS
        // thread (it binds a thread-local loop pointer at construction).
        let mut event_loop = EventLoop::new().expect("EventLoop::new");
        ready_tx.send(event_loop.handle()).expect("send handle");
        event_loop.run();
    });

    let handle = ready_rx.recv().expect("loop thread failed to start");

    // Give the loop a moment to enter its first `poll` with nothing
    // registered but its own wakeup channel.
    std::thread::sleep(Duration::from_millis(50));

    let ran = Arc::new(AtomicBool::new(false));
    let ran_for_task = ran.clone();
    let handle_for_quit = handle.clone();

    let start = Instant::now();
    handle.queue_in_loop(move || {
        ran_for_task.store(true, Ordering::SeqCst);
        handle_for_quit.quit();
    });

    while !ran.load(Ordering::SeqCst) {
        assert!(
            start.elapsed() < Duration::from_millis(500),
            "queued task did not run promptly; the loop was likely still blocked in poll"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "task must run within milliseconds, not after the 10s poll timeout"
    );

    thread.join().expect("loop thread panicked");
}
