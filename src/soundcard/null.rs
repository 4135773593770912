//! Offline soundcard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::handshake::{CycleRequester, HandshakeError};

use super::{Presets, Soundcard, SoundcardFormat, SoundcardLock};

/// Buffers played into a [`NullSoundcard`], shared with the caller.
#[derive(Clone, Debug, Default)]
pub struct Capture(Arc<Mutex<Vec<Vec<f32>>>>);

impl Capture {
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Every captured cycle, concatenated.
    pub fn interleaved(&self) -> Vec<f32> {
        self.0.lock().concat()
    }

    pub fn take(&self) -> Vec<Vec<f32>> {
        std::mem::take(&mut *self.0.lock())
    }

    /// Drain the capture encoded in `format`.
    pub fn take_encoded(&self, format: SoundcardFormat) -> Vec<u8> {
        let mut out = Vec::new();
        for buffer in self.take() {
            format.encode_into(&buffer, &mut out);
        }
        out
    }

    fn push(&self, buffer: &[f32]) {
        self.0.lock().push(buffer.to_vec());
    }
}

struct Pulse {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A soundcard without hardware.
///
/// Every played buffer is appended to a [`Capture`]. Started with a
/// requester, a pulse thread asks the audio loop for one cycle per buffer
/// period, the way a hardware callback would.
pub struct NullSoundcard {
    presets: Presets,
    bpm: f64,
    subdivisions: u32,
    lock: SoundcardLock,
    capture: Capture,
    capturing: bool,
    pulse: Option<Pulse>,
    running: bool,
}

impl core::fmt::Debug for NullSoundcard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NullSoundcard")
            .field("presets", &self.presets)
            .field("bpm", &self.bpm)
            .field("captured", &self.capture.len())
            .field("running", &self.running)
            .finish()
    }
}

impl NullSoundcard {
    pub fn new(presets: Presets) -> Self {
        Self {
            presets,
            bpm: 120.0,
            subdivisions: 4,
            lock: SoundcardLock::default(),
            capture: Capture::default(),
            capturing: true,
            pulse: None,
            running: false,
        }
    }

    /// Discard played buffers instead of keeping them.
    pub fn without_capture(mut self) -> Self {
        self.capturing = false;
        self
    }

    pub fn with_subdivisions(mut self, subdivisions: u32) -> Self {
        self.subdivisions = subdivisions.max(1);
        self
    }

    /// Handle on the captured buffers; stays valid after the soundcard is
    /// handed to an engine.
    pub fn capture(&self) -> Capture {
        self.capture.clone()
    }
}

impl Soundcard for NullSoundcard {
    fn name(&self) -> &str {
        "null"
    }

    fn presets(&self) -> Presets {
        self.presets
    }

    fn set_presets(&mut self, presets: Presets) -> Result<()> {
        if self.running {
            return Err(EngineError::Soundcard("cannot change presets while running".into()));
        }
        presets.validate()?;
        self.presets = presets;
        Ok(())
    }

    fn bpm(&self) -> f64 {
        self.bpm
    }

    fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    fn start(&mut self, requester: Option<CycleRequester>) -> Result<()> {
        if self.running {
            return Ok(());
        }
        if let Some(requester) = requester {
            let stop = Arc::new(AtomicBool::new(false));
            let flag = stop.clone();
            let period = Duration::from_secs_f64(self.presets.buffer_seconds());
            let name = "ags-null-pulse".to_owned();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || pulse(requester, period, flag))
                .map_err(|source| EngineError::ThreadSpawn { name, source })?;
            self.pulse = Some(Pulse { stop, handle });
        }
        self.running = true;
        tracing::debug!(presets = ?self.presets, "null soundcard started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(Pulse { stop, handle }) = self.pulse.take() {
            stop.store(true, Ordering::Release);
            if handle.join().is_err() {
                tracing::warn!("null soundcard pulse thread panicked");
            }
        }
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn play(&mut self, buffer: &[f32]) {
        if self.capturing {
            self.capture.push(buffer);
        }
    }

    fn claim(&mut self, owner: &str) -> Result<()> {
        self.lock.claim(owner)
    }

    fn release(&mut self, owner: &str) {
        self.lock.release(owner);
    }
}

impl Drop for NullSoundcard {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pulse(requester: CycleRequester, period: Duration, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match requester.request() {
            Ok(()) | Err(HandshakeError::Busy) => {}
            Err(HandshakeError::Timeout(after)) => {
                tracing::warn!(?after, "cycle missed its deadline");
            }
            Err(HandshakeError::Disconnected) => break,
        }
        thread::sleep(period);
    }
}
