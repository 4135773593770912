//! Soundcard capability.
//!
//! The engine treats a soundcard purely as a source of timing pulses and a
//! sink for rendered buffers. Backends implement [`Soundcard`]; the engine
//! never knows which one is active.
//!
//! - [`NullSoundcard`]: offline backend that captures every played buffer
//! - [`CpalSoundcard`]: system output through cpal (requires `cpal_backend`)

use dasp_sample::{Sample, I24};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::handshake::CycleRequester;
use crate::timing;

mod null;
pub use null::{Capture, NullSoundcard};

#[cfg(feature = "cpal_backend")]
mod cpal;
#[cfg(feature = "cpal_backend")]
pub use self::cpal::CpalSoundcard;

/// Sample format of the backend's interleaved buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundcardFormat {
    S8,
    S16,
    S24,
    S32,
    Float,
}

impl SoundcardFormat {
    /// Bytes per encoded sample.
    pub fn sample_bytes(self) -> usize {
        match self {
            SoundcardFormat::S8 => 1,
            SoundcardFormat::S16 => 2,
            SoundcardFormat::S24 => 3,
            SoundcardFormat::S32 | SoundcardFormat::Float => 4,
        }
    }

    /// Encode normalized samples as little-endian bytes in this format.
    pub fn encode_into(self, samples: &[f32], out: &mut Vec<u8>) {
        out.reserve(samples.len() * self.sample_bytes());
        for &s in samples {
            let s = s.clamp(-1.0, 1.0);
            match self {
                SoundcardFormat::S8 => out.push(s.to_sample::<i8>() as u8),
                SoundcardFormat::S16 => out.extend_from_slice(&s.to_sample::<i16>().to_le_bytes()),
                SoundcardFormat::S24 => {
                    let v = s.to_sample::<I24>().inner();
                    out.extend_from_slice(&v.to_le_bytes()[..3]);
                }
                SoundcardFormat::S32 => out.extend_from_slice(&s.to_sample::<i32>().to_le_bytes()),
                SoundcardFormat::Float => out.extend_from_slice(&s.to_le_bytes()),
            }
        }
    }
}

/// Channel count, rate, buffer size and format of a soundcard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Presets {
    pub channels: usize,
    pub samplerate: u32,
    /// Frames per cycle
    pub buffer_size: usize,
    pub format: SoundcardFormat,
}

impl Default for Presets {
    fn default() -> Self {
        Self {
            channels: 2,
            samplerate: 44100,
            buffer_size: 512,
            format: SoundcardFormat::S16,
        }
    }
}

impl Presets {
    pub fn new(channels: usize, samplerate: u32, buffer_size: usize, format: SoundcardFormat) -> Self {
        Self {
            channels,
            samplerate,
            buffer_size,
            format,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(EngineError::InvalidPresets("channels must be at least 1".into()));
        }
        if self.samplerate == 0 {
            return Err(EngineError::InvalidPresets("samplerate must be positive".into()));
        }
        if self.buffer_size == 0 {
            return Err(EngineError::InvalidPresets("buffer size must be positive".into()));
        }
        Ok(())
    }

    /// Interleaved samples in one cycle buffer.
    #[inline]
    pub fn interleaved_len(&self) -> usize {
        self.channels * self.buffer_size
    }

    /// Duration of one cycle in seconds.
    #[inline]
    pub fn buffer_seconds(&self) -> f64 {
        self.buffer_size as f64 / self.samplerate as f64
    }
}

/// The capability a backend offers to the audio loop.
pub trait Soundcard: Send {
    fn name(&self) -> &str;

    fn presets(&self) -> Presets;

    /// Change the presets; only allowed while stopped.
    fn set_presets(&mut self, presets: Presets) -> Result<()>;

    fn bpm(&self) -> f64;

    fn set_bpm(&mut self, bpm: f64);

    /// Tics per beat used for [`delay`](Self::delay).
    fn subdivisions(&self) -> u32 {
        4
    }

    /// Cycles per tic at the current tempo.
    fn delay(&self) -> f64 {
        let presets = self.presets();
        timing::delay_per_tic(presets.samplerate, presets.buffer_size, self.bpm(), self.subdivisions())
    }

    /// Start delivering timing pulses. With a requester the backend asks the
    /// audio loop for a cycle every time it needs a buffer.
    fn start(&mut self, requester: Option<CycleRequester>) -> Result<()>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Hand one rendered, interleaved cycle to the backend.
    fn play(&mut self, buffer: &[f32]);

    /// Capture one interleaved cycle; backends without input write silence.
    fn record(&mut self, buffer: &mut [f32]) {
        buffer.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Take exclusive ownership for `owner`.
    fn claim(&mut self, owner: &str) -> Result<()>;

    fn release(&mut self, owner: &str);
}

/// Ownership bookkeeping shared by the backends.
#[derive(Debug, Default)]
pub(crate) struct SoundcardLock {
    owner: Option<String>,
}

impl SoundcardLock {
    pub(crate) fn claim(&mut self, owner: &str) -> Result<()> {
        match &self.owner {
            Some(current) if current != owner => Err(EngineError::SoundcardBusy {
                owner: current.clone(),
            }),
            _ => {
                self.owner = Some(owner.to_owned());
                Ok(())
            }
        }
    }

    pub(crate) fn release(&mut self, owner: &str) {
        if self.owner.as_deref() == Some(owner) {
            self.owner = None;
        }
    }
}
