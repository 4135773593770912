//! System output through cpal.
//!
//! The cpal stream lives on its own thread and drains a ring buffer that
//! [`Soundcard::play`] fills. When started with a requester the stream
//! callback asks the audio loop for cycles until the ring holds enough
//! samples for the hardware buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Sender};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::{EngineError, Result};
use crate::handshake::CycleRequester;

use super::{Presets, Soundcard, SoundcardFormat, SoundcardLock};

/// Cycle requests one hardware callback may issue before it gives up and
/// plays silence.
const MAX_REQUESTS_PER_CALLBACK: usize = 8;

#[derive(Debug, Default)]
struct Counters {
    samples_consumed: AtomicUsize,
    underruns: AtomicU64,
    had_underrun: AtomicBool,
}

struct StreamThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct CpalSoundcard {
    device: cpal::Device,
    name: String,
    presets: Presets,
    sample_format: SampleFormat,
    bpm: f64,
    lock: SoundcardLock,
    producer: Option<Producer<f32>>,
    stream: Option<StreamThread>,
    counters: Arc<Counters>,
    dropped_cycles: u64,
}

impl core::fmt::Debug for CpalSoundcard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CpalSoundcard")
            .field("name", &self.name)
            .field("presets", &self.presets)
            .field("sample_format", &self.sample_format)
            .field("running", &self.stream.is_some())
            .finish()
    }
}

impl CpalSoundcard {
    /// The host's default output device at its default configuration.
    pub fn default_output() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::Soundcard("no default output device".into()))?;
        Self::from_device(device)
    }

    /// Names of every output device of the default host.
    pub fn list_outputs() -> Vec<String> {
        cpal::default_host()
            .output_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    pub fn from_device(device: cpal::Device) -> Result<Self> {
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::Soundcard(e.to_string()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());
        let format = match config.sample_format() {
            SampleFormat::F32 => SoundcardFormat::Float,
            SampleFormat::I32 => SoundcardFormat::S32,
            SampleFormat::I8 => SoundcardFormat::S8,
            _ => SoundcardFormat::S16,
        };
        let presets = Presets::new(config.channels() as usize, config.sample_rate().0, 512, format);

        Ok(Self {
            device,
            name,
            presets,
            sample_format: config.sample_format(),
            bpm: 120.0,
            lock: SoundcardLock::default(),
            producer: None,
            stream: None,
            counters: Arc::new(Counters::default()),
            dropped_cycles: 0,
        })
    }

    /// Samples the hardware has pulled so far.
    pub fn samples_consumed(&self) -> usize {
        self.counters.samples_consumed.load(Ordering::Relaxed)
    }

    /// Check and clear the underrun flag.
    pub fn check_underrun(&self) -> bool {
        self.counters.had_underrun.swap(false, Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.counters.underruns.load(Ordering::Relaxed)
    }

    /// Cycles dropped because the ring buffer was full.
    pub fn dropped_cycles(&self) -> u64 {
        self.dropped_cycles
    }
}

impl Soundcard for CpalSoundcard {
    fn name(&self) -> &str {
        &self.name
    }

    fn presets(&self) -> Presets {
        self.presets
    }

    fn set_presets(&mut self, presets: Presets) -> Result<()> {
        if self.stream.is_some() {
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

    fn start(&mut self, requester: Option<CycleRequester>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        // Room for ~100ms, and never less than four cycles.
        let presets = self.presets;
        let hundred_ms = (presets.samplerate as usize / 10) * presets.channels;
        let capacity = hundred_ms.max(presets.interleaved_len() * 4).next_power_of_two();
        let (producer, consumer) = RingBuffer::<f32>::new(capacity);

        let config = cpal::StreamConfig {
            channels: presets.channels as u16,
            sample_rate: cpal::SampleRate(presets.samplerate),
            buffer_size: cpal::BufferSize::Default,
        };
        let device = self.device.clone();
        let sample_format = self.sample_format;
        let counters = self.counters.clone();
        let (stop, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let name = "ags-cpal-stream".to_owned();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let stream = match build_stream(&device, sample_format, &config, consumer, requester, counters) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(EngineError::Soundcard(err.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // The stream lives as long as this thread.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(EngineError::Soundcard("stream thread exited during start".into()));
            }
        }

        tracing::info!(device = %self.name, ?presets, capacity, "cpal stream started");
        self.producer = Some(producer);
        self.stream = Some(StreamThread { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(StreamThread { stop, handle }) = self.stream.take() {
            let _ = stop.send(());
            if handle.join().is_err() {
                tracing::warn!("cpal stream thread panicked");
            }
            tracing::info!(device = %self.name, "cpal stream stopped");
        }
        self.producer = None;
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    fn play(&mut self, buffer: &[f32]) {
        let Some(producer) = self.producer.as_mut() else {
            return;
        };
        // Skip the cycle rather than write it partially.
        if producer.slots() < buffer.len() {
            self.dropped_cycles += 1;
            tracing::trace!(dropped = self.dropped_cycles, "ring buffer full, cycle dropped");
            return;
        }
        for sample in buffer {
            let _ = producer.push(*sample);
        }
    }

    fn claim(&mut self, owner: &str) -> Result<()> {
        self.lock.claim(owner)
    }

    fn release(&mut self, owner: &str) {
        self.lock.release(owner);
    }
}

impl Drop for CpalSoundcard {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    config: &cpal::StreamConfig,
    consumer: Consumer<f32>,
    requester: Option<CycleRequester>,
    counters: Arc<Counters>,
) -> Result<cpal::Stream> {
    match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, config, consumer, requester, counters),
        SampleFormat::I16 => build_typed::<i16>(device, config, consumer, requester, counters),
        SampleFormat::U16 => build_typed::<u16>(device, config, consumer, requester, counters),
        SampleFormat::I32 => build_typed::<i32>(device, config, consumer, requester, counters),
        SampleFormat::I8 => build_typed::<i8>(device, config, consumer, requester, counters),
        other => Err(EngineError::Soundcard(format!("unsupported sample format {other:?}"))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    requester: Option<CycleRequester>,
    counters: Arc<Counters>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if let Some(requester) = &requester {
                    let mut requests = 0;
                    while consumer.slots() < data.len() && requests < MAX_REQUESTS_PER_CALLBACK {
                        if requester.request().is_err() {
                            break;
                        }
                        requests += 1;
                    }
                }

                let mut underrun = false;
                for sample in data.iter_mut() {
                    let s = consumer.pop().unwrap_or_else(|_| {
                        underrun = true;
                        0.0
                    });
                    *sample = T::from_sample(s.clamp(-1.0, 1.0));
                }
                if underrun {
                    counters.had_underrun.store(true, Ordering::Relaxed);
                    counters.underruns.fetch_add(1, Ordering::Relaxed);
                }
                counters.samples_consumed.fetch_add(data.len(), Ordering::Relaxed);
            },
            |err| tracing::warn!(%err, "cpal stream error"),
            None,
        )
        .map_err(|e| EngineError::Soundcard(e.to_string()))
}
