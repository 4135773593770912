use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ags_engine::handshake::{handshake, HandshakeError, Wake};

#[test]
fn one_request_runs_one_cycle() {
    let (requester, responder) = handshake(Duration::from_secs(5));
    let loop_thread = thread::spawn(move || {
        let mut cycles = 0;
        while responder.wait() == Wake::Cycle {
            cycles += 1;
            responder.done();
        }
        cycles
    });

    for _ in 0..10 {
        requester.request().unwrap();
    }
    requester.stop();
    assert_eq!(loop_thread.join().unwrap(), 10);
}

#[test]
fn slow_cycles_time_out() {
    let (requester, responder) = handshake(Duration::from_millis(10));
    let loop_thread = thread::spawn(move || {
        assert_eq!(responder.wait(), Wake::Cycle);
        thread::sleep(Duration::from_millis(100));
        responder.done();
        assert_eq!(responder.wait(), Wake::Cycle);
        responder.done();
        assert_eq!(responder.wait(), Wake::Stop);
    });

    assert!(matches!(requester.request(), Err(HandshakeError::Timeout(_))));
    // the late token of the first cycle is not mistaken for the second one
    thread::sleep(Duration::from_millis(150));
    requester.request_timeout(Duration::from_secs(5)).unwrap();
    requester.stop();
    loop_thread.join().unwrap();
}

#[test]
fn late_cycle_is_not_taken_for_the_next_one() {
    let (requester, responder) = handshake(Duration::from_millis(10));
    let finished = Arc::new(AtomicUsize::new(0));
    let loop_thread = {
        let finished = finished.clone();
        thread::spawn(move || {
            while responder.wait() == Wake::Cycle {
                thread::sleep(Duration::from_millis(100));
                finished.fetch_add(1, Ordering::SeqCst);
                responder.done();
            }
        })
    };

    assert!(matches!(requester.request(), Err(HandshakeError::Timeout(_))));
    while requester.is_pending() {
        thread::sleep(Duration::from_millis(1));
    }
    // asked while the first cycle is still running
    requester.request_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 2);

    requester.request_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 3);
    requester.stop();
    loop_thread.join().unwrap();
}

#[test]
fn pending_request_makes_the_next_one_busy() {
    let (requester, responder) = handshake(Duration::from_millis(5));
    assert!(matches!(requester.request(), Err(HandshakeError::Timeout(_))));
    assert!(requester.is_pending());
    assert_eq!(requester.request(), Err(HandshakeError::Busy));

    assert_eq!(responder.poll(), Some(Wake::Cycle));
    assert_eq!(responder.poll(), None);
}

#[test]
fn dropped_loop_disconnects() {
    let (requester, responder) = handshake(Duration::from_millis(5));
    drop(responder);
    assert_eq!(requester.request(), Err(HandshakeError::Disconnected));
}
