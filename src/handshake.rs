//! Rendezvous between a backend callback and the audio loop.
//!
//! Two single-slot channels model the protocol: the backend puts a token in
//! "cycle requested", the loop wakes, runs exactly one cycle and puts a token
//! in "cycle done". The backend waits for that token (bounded by a timeout)
//! before it returns control to the hardware API.
//!
//! Requests are numbered and every done token carries the number of the
//! cycle it finishes, so a cycle that ends after its deadline is never taken
//! for the one requested next.
//!
//! ```text
//! backend callback                 audio loop thread
//!     | --- request ------------------> | (blocked in wait())
//!     |                                 | run one cycle
//!     | <------------------- done ----- |
//!   return to hardware
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use thiserror::Error;

/// Why a requested cycle did not complete in time.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// The previous request has not been picked up yet.
    #[error("audio loop is still busy with the previous cycle")]
    Busy,
    /// The loop did not signal done before the deadline.
    #[error("cycle did not finish within {0:?}")]
    Timeout(Duration),
    /// The loop side is gone.
    #[error("audio loop disconnected")]
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Request {
    Cycle(u64),
    Stop,
}

/// What the loop side observes when it wakes up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    Cycle,
    Stop,
}

/// Create a connected requester/responder pair.
///
/// `timeout` bounds how long [`CycleRequester::request`] waits for a cycle,
/// normally one buffer period.
pub fn handshake(timeout: Duration) -> (CycleRequester, CycleResponder) {
    let (request_tx, request_rx) = bounded(1);
    let (done_tx, done_rx) = bounded(1);
    (
        CycleRequester {
            request_tx,
            done_rx,
            sequence: Arc::new(AtomicU64::new(0)),
            timeout,
        },
        CycleResponder {
            request_rx,
            done_tx,
            current: AtomicU64::new(0),
        },
    )
}

/// Backend side of the rendezvous.
#[derive(Clone)]
pub struct CycleRequester {
    request_tx: Sender<Request>,
    done_rx: Receiver<u64>,
    sequence: Arc<AtomicU64>,
    timeout: Duration,
}

impl CycleRequester {
    /// Ask for one cycle and wait until it is done.
    pub fn request(&self) -> Result<(), HandshakeError> {
        self.request_timeout(self.timeout)
    }

    pub fn request_timeout(&self, timeout: Duration) -> Result<(), HandshakeError> {
        let deadline = Instant::now() + timeout;
        // Tokens of cycles that finished after their deadline.
        while self.done_rx.try_recv().is_ok() {}

        if self.request_tx.is_full() {
            return Err(HandshakeError::Busy);
        }
        let cycle = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        match self.request_tx.try_send(Request::Cycle(cycle)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(HandshakeError::Busy),
            Err(TrySendError::Disconnected(_)) => return Err(HandshakeError::Disconnected),
        }

        loop {
            match self.done_rx.recv_deadline(deadline) {
                Ok(done) if done == cycle => return Ok(()),
                Ok(late) => tracing::trace!(late, cycle, "late cycle finished"),
                Err(RecvTimeoutError::Timeout) => return Err(HandshakeError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(HandshakeError::Disconnected),
            }
        }
    }

    /// Whether a request is waiting to be picked up by the loop.
    pub fn is_pending(&self) -> bool {
        !self.request_tx.is_empty()
    }

    /// Ask the loop thread to exit after its current cycle.
    pub fn stop(&self) {
        // Blocking send: a pending cycle request must not swallow the stop.
        let _ = self.request_tx.send(Request::Stop);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Loop side of the rendezvous.
pub struct CycleResponder {
    request_rx: Receiver<Request>,
    done_tx: Sender<u64>,
    current: AtomicU64,
}

impl CycleResponder {
    /// Block until the backend requests a cycle or asks to stop.
    pub fn wait(&self) -> Wake {
        self.wake(self.request_rx.recv().ok())
    }

    /// Non-blocking variant of [`wait`](Self::wait).
    pub fn poll(&self) -> Option<Wake> {
        match self.request_rx.try_recv() {
            Ok(request) => Some(self.wake(Some(request))),
            Err(TryRecvError::Disconnected) => Some(Wake::Stop),
            Err(TryRecvError::Empty) => None,
        }
    }

    fn wake(&self, request: Option<Request>) -> Wake {
        match request {
            Some(Request::Cycle(cycle)) => {
                self.current.store(cycle, Ordering::Release);
                Wake::Cycle
            }
            Some(Request::Stop) | None => Wake::Stop,
        }
    }

    /// Signal that the last requested cycle is finished.
    pub fn done(&self) {
        // Full slot means the requester already gave up on an earlier cycle
        // and has not drained its token yet.
        let _ = self.done_tx.try_send(self.current.load(Ordering::Acquire));
    }
}
