use parking_lot::Mutex;

use crate::audio_loop::CycleInfo;
use crate::audio_signal::AudioSignal;
use crate::playback::SoundScope;
use crate::recycling::Recycling;
use crate::soundcard::Presets;
use crate::tree::{AudioId, Channel, ChannelId, RecallId, RecyclingId, SignalId, Tree};

use super::{Binding, Voice};

/// Everything a live instance may look at while one of its stage hooks
/// runs: the tree (read-only), its voice, its binding and the cycle.
///
/// Signal lists and the soundcard buffer sit behind their own mutexes, so
/// hooks mutate them through `&self`.
pub struct RecallContext<'a> {
    tree: &'a Tree,
    voice: &'a Voice,
    binding: Binding,
    cycle: &'a CycleInfo,
    output: Option<&'a Mutex<Vec<f32>>>,
}

impl<'a> RecallContext<'a> {
    pub(crate) fn new(
        tree: &'a Tree,
        voice: &'a Voice,
        binding: Binding,
        cycle: &'a CycleInfo,
        output: Option<&'a Mutex<Vec<f32>>>,
    ) -> Self {
        Self {
            tree,
            voice,
            binding,
            cycle,
            output,
        }
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    pub fn voice(&self) -> &'a Voice {
        self.voice
    }

    pub fn recall_id(&self) -> RecallId {
        self.voice.id()
    }

    pub fn scope(&self) -> SoundScope {
        self.voice.scope()
    }

    pub fn audio(&self) -> AudioId {
        self.voice.audio()
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn cycle(&self) -> &'a CycleInfo {
        self.cycle
    }

    pub fn presets(&self) -> &'a Presets {
        &self.cycle.presets
    }

    /// The channel the instance is bound to.
    pub fn channel(&self) -> Option<&'a Channel> {
        self.binding.channel().and_then(|c| self.tree.channel(c).ok())
    }

    /// The recycling a recycling-level instance is bound to.
    pub fn recycling(&self) -> Option<&'a Recycling> {
        self.binding
            .recycling()
            .and_then(|r| self.tree.recycling(r).ok())
    }

    /// Whether this voice was started on this audio rather than pulled in.
    pub fn is_root(&self) -> bool {
        self.voice.parent().is_none()
    }

    /// The voice whose signals in `recycling` this voice consumes.
    pub fn producer_of(&self, recycling: RecyclingId) -> RecallId {
        self.tree
            .find_producer(self.voice.context(), recycling)
            .unwrap_or(self.voice.id())
    }

    /// Visit every live signal in `channel`'s range produced for this voice.
    ///
    /// Each recycling's list is locked while its signals are visited; `f`
    /// must not lock another recycling.
    pub fn for_each_signal(&self, channel: ChannelId, mut f: impl FnMut(&mut AudioSignal)) {
        for r in self.tree.range_recyclings(channel) {
            let producer = self.producer_of(r);
            let Ok(recycling) = self.tree.recycling(r) else {
                continue;
            };
            let mut signals = recycling.signals();
            for signal in signals
                .iter_mut()
                .filter(|s| s.recall_id() == Some(producer))
            {
                f(signal);
            }
        }
    }

    /// Visit this voice's own signals in `recycling`.
    pub fn for_each_own_signal(&self, recycling: RecyclingId, mut f: impl FnMut(&mut AudioSignal)) {
        let Ok(recycling) = self.tree.recycling(recycling) else {
            return;
        };
        let id = self.voice.id();
        for signal in recycling
            .signals()
            .iter_mut()
            .filter(|s| s.recall_id() == Some(id))
        {
            f(signal);
        }
    }

    /// Run `f` on this voice's destination signal in `recycling`, if any.
    pub fn with_destination<R>(&self, recycling: RecyclingId, f: impl FnOnce(&mut AudioSignal) -> R) -> Option<R> {
        let recycling = self.tree.recycling(recycling).ok()?;
        let id = self.voice.id();
        let mut signals = recycling.signals();
        signals
            .iter_mut()
            .find(|s| s.is_destination() && s.recall_id() == Some(id))
            .map(f)
    }

    /// Create a live signal for this voice in `recycling` and feed it
    /// `frames` frames of `template`, starting `attack` frames into the
    /// current buffer.
    pub fn spawn_signal(
        &self,
        recycling: RecyclingId,
        template: &AudioSignal,
        frames: u64,
        attack: usize,
        gain: f32,
    ) -> Option<SignalId> {
        let target = self.tree.recycling(recycling).ok()?;
        let id = self.tree.alloc_signal();
        let mut signal = AudioSignal::new(&self.cycle.presets)
            .with_attack(attack)
            .bind(id, recycling, self.voice.id())
            .with_timing(self.cycle.frame + attack as u64, self.cycle.delay);
        signal.feed(template, frames);
        if gain != 1.0 {
            signal.apply_gain(gain);
        }
        target.signals().push(signal);
        tracing::trace!(signal = %id, %recycling, recall_id = %self.voice.id(), frames, attack, "signal spawned");
        Some(id)
    }

    /// Add a mono buffer into the interleaved soundcard buffer at the slot
    /// of `audio_channel`.
    pub fn mix_to_output(&self, audio_channel: usize, buffer: &[f32], gain: f32) {
        let Some(output) = self.output else {
            return;
        };
        let channels = self.cycle.presets.channels.max(1);
        let slot = audio_channel % channels;
        let mut output = output.lock();
        for (frame, sample) in output.chunks_mut(channels).zip(buffer) {
            frame[slot] += *sample * gain;
        }
    }
}
