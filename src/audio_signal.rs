//! Sample streams.
//!
//! An [`AudioSignal`] is a list of fixed-size buffers with three cursors:
//! `start` (first retained buffer), `current` (the buffer being played this
//! cycle) and `end` (one past the last buffer). Cursors are absolute buffer
//! indices, so pruning consumed buffers does not move them.
//!
//! Template signals carry a [`TemplateSource`] and are shared read-only
//! behind an `Arc`; live signals are fed from a template and owned by one
//! voice.

use std::f64::consts::TAU;
use std::sync::Arc;

use bitflags::bitflags;

use crate::soundcard::{Presets, SoundcardFormat};
use crate::tree::{RecallId, RecyclingId, SignalId};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SignalFlags: u32 {
        /// Read-only source data
        const TEMPLATE = 1 << 0;
        /// Mixing target of a voice; cleared every cycle instead of consumed
        const DESTINATION = 1 << 1;
        /// Fully played
        const DONE = 1 << 2;
    }
}

/// Shape of an algorithmic source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Sawtooth,
    Triangle,
    Square,
    Impulse,
}

/// Periodic oscillator evaluated per frame, so output does not depend on
/// how the stream is chunked.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Generator {
    pub waveform: Waveform,
    pub frequency: f64,
    pub amplitude: f32,
    /// Start phase in cycles, 0..1
    pub phase: f64,
}

impl Generator {
    pub fn new(waveform: Waveform, frequency: f64) -> Self {
        Self {
            waveform,
            frequency,
            amplitude: 1.0,
            phase: 0.0,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    /// Value at frame `pos`.
    pub fn sample(&self, pos: u64, samplerate: u32) -> f32 {
        let t = pos as f64 * self.frequency / samplerate as f64 + self.phase;
        let frac = t.fract();
        let value = match self.waveform {
            Waveform::Sine => (TAU * frac).sin(),
            Waveform::Sawtooth => 2.0 * frac - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (frac - 0.5).abs(),
            Waveform::Square => {
                if frac < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Impulse => {
                let step = self.frequency / samplerate as f64;
                if frac < step || pos == 0 {
                    1.0
                } else {
                    0.0
                }
            }
        };
        value as f32 * self.amplitude
    }
}

/// Where a template's frames come from.
#[derive(Clone, Debug)]
pub enum TemplateSource {
    /// Pre-rendered mono samples
    Samples(Arc<[f32]>),
    Generator(Generator),
}

/// One concrete or template sample stream.
#[derive(Clone, Debug)]
pub struct AudioSignal {
    pub(crate) id: Option<SignalId>,
    pub(crate) recycling: Option<RecyclingId>,
    pub(crate) recall_id: Option<RecallId>,
    pub(crate) flags: SignalFlags,

    samplerate: u32,
    buffer_size: usize,
    format: SoundcardFormat,

    /// Clock frame the signal starts on
    first_frame: u64,
    last_frame: u64,
    /// Frames fed (live) or source length (template)
    frame_count: u64,
    loop_start: u64,
    loop_end: u64,
    /// Cycles between the spawning tic and the next one
    delay: f64,
    /// Offset of the first frame inside the first buffer
    attack: usize,

    source: Option<TemplateSource>,

    stream: Vec<Vec<f32>>,
    start: usize,
    current: usize,
}

impl AudioSignal {
    /// Empty live signal using the given presets.
    pub fn new(presets: &Presets) -> Self {
        Self {
            id: None,
            recycling: None,
            recall_id: None,
            flags: SignalFlags::empty(),
            samplerate: presets.samplerate,
            buffer_size: presets.buffer_size.max(1),
            format: presets.format,
            first_frame: 0,
            last_frame: 0,
            frame_count: 0,
            loop_start: 0,
            loop_end: 0,
            delay: 0.0,
            attack: 0,
            source: None,
            stream: Vec::new(),
            start: 0,
            current: 0,
        }
    }

    /// Template backed by pre-rendered samples.
    pub fn from_samples(presets: &Presets, samples: impl Into<Arc<[f32]>>) -> Self {
        let samples: Arc<[f32]> = samples.into();
        let mut signal = Self::new(presets);
        signal.flags = SignalFlags::TEMPLATE;
        signal.frame_count = samples.len() as u64;
        signal.source = Some(TemplateSource::Samples(samples));
        signal
    }

    /// Template backed by an oscillator, `frame_count` frames long.
    pub fn from_generator(presets: &Presets, generator: Generator, frame_count: u64) -> Self {
        let mut signal = Self::new(presets);
        signal.flags = SignalFlags::TEMPLATE;
        signal.frame_count = frame_count;
        signal.source = Some(TemplateSource::Generator(generator));
        signal
    }

    /// Loop the template between `start` and `end` frames when feeding.
    pub fn with_loop(mut self, start: u64, end: u64) -> Self {
        self.loop_start = start;
        self.loop_end = end;
        self
    }

    pub fn with_attack(mut self, attack: usize) -> Self {
        self.attack = attack.min(self.buffer_size.saturating_sub(1));
        self
    }

    pub(crate) fn bind(mut self, id: SignalId, recycling: RecyclingId, recall_id: RecallId) -> Self {
        self.id = Some(id);
        self.recycling = Some(recycling);
        self.recall_id = Some(recall_id);
        self
    }

    pub(crate) fn with_timing(mut self, first_frame: u64, delay: f64) -> Self {
        self.first_frame = first_frame;
        self.last_frame = first_frame;
        self.delay = delay;
        self
    }

    pub fn id(&self) -> Option<SignalId> {
        self.id
    }

    pub fn recycling(&self) -> Option<RecyclingId> {
        self.recycling
    }

    pub fn recall_id(&self) -> Option<RecallId> {
        self.recall_id
    }

    pub fn flags(&self) -> SignalFlags {
        self.flags
    }

    pub fn is_template(&self) -> bool {
        self.flags.contains(SignalFlags::TEMPLATE)
    }

    pub fn is_destination(&self) -> bool {
        self.flags.contains(SignalFlags::DESTINATION)
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn format(&self) -> SoundcardFormat {
        self.format
    }

    pub fn first_frame(&self) -> u64 {
        self.first_frame
    }

    pub fn last_frame(&self) -> u64 {
        self.last_frame
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn loop_region(&self) -> (u64, u64) {
        (self.loop_start, self.loop_end)
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn attack(&self) -> usize {
        self.attack
    }

    pub fn source(&self) -> Option<&TemplateSource> {
        self.source.as_ref()
    }

    fn is_looping(&self) -> bool {
        self.loop_end > self.loop_start
    }

    /// Template value at source frame `pos`, honouring the loop region.
    pub fn sample_at(&self, pos: u64) -> f32 {
        let pos = if self.is_looping() && pos >= self.loop_end {
            self.loop_start + (pos - self.loop_start) % (self.loop_end - self.loop_start)
        } else {
            pos
        };
        match &self.source {
            Some(TemplateSource::Samples(samples)) => samples.get(pos as usize).copied().unwrap_or(0.0),
            Some(TemplateSource::Generator(generator)) => {
                if pos < self.frame_count || self.is_looping() {
                    generator.sample(pos, self.samplerate)
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// Extend the stream by exactly `frame_count` frames taken from
    /// `template`, continuing where the previous feed stopped.
    pub fn feed(&mut self, template: &AudioSignal, frame_count: u64) {
        let bs = self.buffer_size as u64;
        let fed = self.frame_count;
        let base = self.attack as u64 + fed;

        let last_buffer = (base + frame_count).div_ceil(bs) as usize;
        if last_buffer > self.end() {
            self.stream_resize(last_buffer - self.start);
        }

        for n in 0..frame_count {
            let frame = base + n;
            let buffer = (frame / bs) as usize;
            if buffer < self.start {
                // already consumed
                continue;
            }
            let value = template.sample_at(fed + n);
            self.stream[buffer - self.start][(frame % bs) as usize] = value;
        }

        self.frame_count += frame_count;
        self.last_frame = self.first_frame + self.attack as u64 + self.frame_count;
        self.flags.remove(SignalFlags::DONE);
    }

    /// Total frames fed into this signal.
    #[inline]
    pub fn sample_count(&self) -> u64 {
        self.frame_count
    }

    /// Absolute index of the first retained buffer.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// One past the last buffer.
    pub fn end(&self) -> usize {
        self.start + self.stream.len()
    }

    /// Retained buffers.
    pub fn buffers(&self) -> &[Vec<f32>] {
        &self.stream
    }

    /// Resize the retained stream to `len` buffers, clamping `current`.
    pub fn stream_resize(&mut self, len: usize) {
        let bs = self.buffer_size;
        self.stream.resize_with(len, || vec![0.0; bs]);
        self.current = self.current.min(self.end());
    }

    /// Like [`stream_resize`](Self::stream_resize) but never drops the buffer
    /// at or before `current`.
    pub fn stream_safe_resize(&mut self, len: usize) {
        let keep = (self.current + 1)
            .saturating_sub(self.start)
            .min(self.stream.len());
        self.stream_resize(len.max(keep));
    }

    pub fn current_buffer(&self) -> Option<&[f32]> {
        self.current
            .checked_sub(self.start)
            .and_then(|i| self.stream.get(i))
            .map(Vec::as_slice)
    }

    pub fn current_buffer_mut(&mut self) -> Option<&mut [f32]> {
        self.current
            .checked_sub(self.start)
            .and_then(|i| self.stream.get_mut(i))
            .map(Vec::as_mut_slice)
    }

    /// Move to the next buffer; marks the signal done past the end.
    pub fn advance(&mut self) {
        if self.current < self.end() {
            self.current += 1;
        }
        if self.is_exhausted() {
            self.flags.insert(SignalFlags::DONE);
        }
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.current >= self.end()
    }

    /// Drop buffers before `current`.
    pub fn prune_consumed(&mut self) {
        let consumed = self.current.saturating_sub(self.start).min(self.stream.len());
        if consumed > 0 {
            self.stream.drain(..consumed);
            self.start += consumed;
        }
    }

    /// Make sure the current buffer exists and is silent.
    pub fn ensure_current_cleared(&mut self) {
        if self.current_buffer().is_none() {
            self.stream_resize(self.current.saturating_sub(self.start) + 1);
        }
        if let Some(buffer) = self.current_buffer_mut() {
            buffer.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    /// Mix `source` into the current buffer.
    pub fn mix_into_current(&mut self, source: &[f32], gain: f32) {
        if let Some(buffer) = self.current_buffer_mut() {
            for (d, s) in buffer.iter_mut().zip(source) {
                *d += *s * gain;
            }
        }
    }

    /// Scale every retained buffer.
    pub fn apply_gain(&mut self, gain: f32) {
        for buffer in &mut self.stream {
            buffer.iter_mut().for_each(|s| *s *= gain);
        }
    }

    /// Encode every retained buffer in the signal's format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for buffer in &self.stream {
            self.format.encode_into(buffer, &mut out);
        }
        out
    }

    pub(crate) fn destination(presets: &Presets) -> Self {
        let mut signal = Self::new(presets);
        signal.flags = SignalFlags::DESTINATION;
        signal.stream_resize(1);
        signal
    }
}
