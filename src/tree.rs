//! The arena that owns every graph object.
//!
//! Audios, channels, recyclings, recycling contexts, recall containers and
//! voices all live in [`Tree`] and refer to each other through copyable
//! handles. The tree is guarded by one `RwLock` owned by the engine:
//! structural edits take the write half, a processing cycle the read half.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use itertools::Itertools;

use crate::error::{EngineError, Result};
use crate::playback::{Playback, SoundScope};
use crate::recall::{RecallContainer, Voice};
use crate::recycling::{Recycling, RecyclingChanged};
use crate::recycling_context::RecyclingContext;
use crate::soundcard::Presets;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(pub(crate) $inner);

        impl $name {
            /// Raw index, stable for the lifetime of the object.
            pub fn index(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// Identifies an [`Audio`] in a [`Tree`].
    AudioId(u32)
);
handle!(
    /// Identifies a [`Channel`] in a [`Tree`].
    ChannelId(u32)
);
handle!(
    /// Identifies a [`Recycling`] in a [`Tree`].
    RecyclingId(u32)
);
handle!(
    /// Identifies a [`RecyclingContext`] in a [`Tree`].
    ContextId(u32)
);
handle!(
    /// Identifies a [`RecallContainer`] in a [`Tree`].
    ContainerId(u32)
);
handle!(
    /// Identity of one running voice in one sound scope.
    RecallId(u64)
);
handle!(SignalId(u64));

/// Which chain of its audio a channel belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    Output,
    Input,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Output => Direction::Input,
            Direction::Input => Direction::Output,
        }
    }
}

bitflags! {
    /// Per-audio behaviour switches.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AudioFlags: u32 {
        /// Every output channel owns a recycling.
        const OUTPUT_HAS_RECYCLING = 1 << 0;
        /// Every unlinked input channel owns a recycling.
        const INPUT_HAS_RECYCLING = 1 << 1;
        /// Input pad `p` feeds output pad `p` instead of all inputs feeding pad 0.
        const SYNC = 1 << 2;
    }
}

/// One instrument or track: an output chain and an input chain of channels.
#[derive(Debug)]
pub struct Audio {
    pub(crate) id: AudioId,
    pub(crate) name: String,
    pub(crate) flags: AudioFlags,
    pub(crate) audio_channels: usize,
    pub(crate) output_pads: usize,
    pub(crate) input_pads: usize,
    /// Ordered by line
    pub(crate) outputs: Vec<ChannelId>,
    pub(crate) inputs: Vec<ChannelId>,
    pub(crate) containers: Vec<ContainerId>,
    pub(crate) recall_ids: Vec<RecallId>,
}

impl Audio {
    pub fn id(&self) -> AudioId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> AudioFlags {
        self.flags
    }

    pub fn audio_channels(&self) -> usize {
        self.audio_channels
    }

    pub fn pads(&self, direction: Direction) -> usize {
        match direction {
            Direction::Output => self.output_pads,
            Direction::Input => self.input_pads,
        }
    }

    pub fn chain(&self, direction: Direction) -> &[ChannelId] {
        match direction {
            Direction::Output => &self.outputs,
            Direction::Input => &self.inputs,
        }
    }

    pub(crate) fn chain_mut(&mut self, direction: Direction) -> &mut Vec<ChannelId> {
        match direction {
            Direction::Output => &mut self.outputs,
            Direction::Input => &mut self.inputs,
        }
    }

    pub fn outputs(&self) -> &[ChannelId] {
        &self.outputs
    }

    pub fn inputs(&self) -> &[ChannelId] {
        &self.inputs
    }

    /// Channel at `pad`/`audio_channel` of the given chain.
    pub fn channel_at(&self, direction: Direction, pad: usize, audio_channel: usize) -> Option<ChannelId> {
        if audio_channel >= self.audio_channels {
            return None;
        }
        self.chain(direction)
            .get(pad * self.audio_channels + audio_channel)
            .copied()
    }

    pub fn containers(&self) -> &[ContainerId] {
        &self.containers
    }

    /// Voices currently running on this audio.
    pub fn recall_ids(&self) -> &[RecallId] {
        &self.recall_ids
    }

    pub fn has_recycling(&self, direction: Direction) -> bool {
        match direction {
            Direction::Output => self.flags.contains(AudioFlags::OUTPUT_HAS_RECYCLING),
            Direction::Input => self.flags.contains(AudioFlags::INPUT_HAS_RECYCLING),
        }
    }
}

/// A node in an audio's output or input chain.
#[derive(Debug)]
pub struct Channel {
    pub(crate) id: ChannelId,
    pub(crate) audio: AudioId,
    pub(crate) direction: Direction,
    pub(crate) pad: usize,
    pub(crate) audio_channel: usize,
    pub(crate) line: usize,

    pub(crate) prev: Option<ChannelId>,
    pub(crate) next: Option<ChannelId>,
    pub(crate) prev_pad: Option<ChannelId>,
    pub(crate) next_pad: Option<ChannelId>,

    pub(crate) link: Option<ChannelId>,

    /// Recycling owned by this channel, if any
    pub(crate) recycling: Option<RecyclingId>,
    pub(crate) first_recycling: Option<RecyclingId>,
    pub(crate) last_recycling: Option<RecyclingId>,

    /// Live voices on this channel, in sound-scope order
    pub(crate) recall_ids: Vec<RecallId>,
    pub(crate) playback: Playback,
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        audio: AudioId,
        direction: Direction,
        pad: usize,
        audio_channel: usize,
        line: usize,
    ) -> Self {
        Self {
            id,
            audio,
            direction,
            pad,
            audio_channel,
            line,
            prev: None,
            next: None,
            prev_pad: None,
            next_pad: None,
            link: None,
            recycling: None,
            first_recycling: None,
            last_recycling: None,
            recall_ids: Vec::new(),
            playback: Playback::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    pub fn audio_channel(&self) -> usize {
        self.audio_channel
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn prev(&self) -> Option<ChannelId> {
        self.prev
    }

    pub fn next(&self) -> Option<ChannelId> {
        self.next
    }

    pub fn prev_pad(&self) -> Option<ChannelId> {
        self.prev_pad
    }

    pub fn next_pad(&self) -> Option<ChannelId> {
        self.next_pad
    }

    pub fn link(&self) -> Option<ChannelId> {
        self.link
    }

    pub fn own_recycling(&self) -> Option<RecyclingId> {
        self.recycling
    }

    /// First and last recycling of this channel's range.
    pub fn range(&self) -> Option<(RecyclingId, RecyclingId)> {
        self.first_recycling.zip(self.last_recycling)
    }

    pub fn recall_ids(&self) -> &[RecallId] {
        &self.recall_ids
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut Playback {
        &mut self.playback
    }
}

/// Owner of every graph object.
pub struct Tree {
    pub(crate) audios: HashMap<AudioId, Audio>,
    pub(crate) channels: HashMap<ChannelId, Channel>,
    pub(crate) recyclings: HashMap<RecyclingId, Recycling>,
    pub(crate) contexts: HashMap<ContextId, RecyclingContext>,
    pub(crate) containers: HashMap<ContainerId, RecallContainer>,
    pub(crate) voices: HashMap<RecallId, Voice>,

    /// Insertion order of audios; schedules and snapshots iterate in it
    pub(crate) audio_order: Vec<AudioId>,

    next_audio: u32,
    next_channel: u32,
    next_recycling: u32,
    next_context: u32,
    next_container: u32,
    next_recall: u64,
    next_signal: AtomicU64,

    /// Bumped by every structural change
    generation: u64,
    presets: Presets,

    subscribers: Vec<Sender<RecyclingChanged>>,
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("audios", &self.audios.len())
            .field("channels", &self.channels.len())
            .field("recyclings", &self.recyclings.len())
            .field("voices", &self.voices.len())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new(Presets::default())
    }
}

impl Tree {
    pub fn new(presets: Presets) -> Self {
        Self {
            audios: HashMap::new(),
            channels: HashMap::new(),
            recyclings: HashMap::new(),
            contexts: HashMap::new(),
            containers: HashMap::new(),
            voices: HashMap::new(),
            audio_order: Vec::new(),
            next_audio: 0,
            next_channel: 0,
            next_recycling: 0,
            next_context: 0,
            next_container: 0,
            next_recall: 0,
            next_signal: AtomicU64::new(0),
            generation: 0,
            presets,
            subscribers: Vec::new(),
        }
    }

    pub fn presets(&self) -> Presets {
        self.presets
    }

    pub(crate) fn set_presets(&mut self, presets: Presets) {
        self.presets = presets;
        self.touch();
    }

    /// Counter that changes whenever the topology or the set of voices does.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub(crate) fn touch(&mut self) {
        self.generation += 1;
    }

    /// Receive a [`RecyclingChanged`] event for every range change.
    pub fn subscribe(&mut self) -> Receiver<RecyclingChanged> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: RecyclingChanged) {
        tracing::trace!(?event, "recycling changed");
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    // id allocation

    pub(crate) fn alloc_audio(&mut self) -> AudioId {
        self.next_audio += 1;
        AudioId(self.next_audio - 1)
    }

    pub(crate) fn alloc_channel(&mut self) -> ChannelId {
        self.next_channel += 1;
        ChannelId(self.next_channel - 1)
    }

    pub(crate) fn alloc_recycling(&mut self) -> RecyclingId {
        self.next_recycling += 1;
        RecyclingId(self.next_recycling - 1)
    }

    pub(crate) fn alloc_context(&mut self) -> ContextId {
        self.next_context += 1;
        ContextId(self.next_context - 1)
    }

    pub(crate) fn alloc_container(&mut self) -> ContainerId {
        self.next_container += 1;
        ContainerId(self.next_container - 1)
    }

    pub(crate) fn alloc_recall_id(&mut self) -> RecallId {
        self.next_recall += 1;
        RecallId(self.next_recall - 1)
    }

    /// Signals are created during RUN under the read lock.
    pub(crate) fn alloc_signal(&self) -> SignalId {
        SignalId(self.next_signal.fetch_add(1, Ordering::Relaxed))
    }

    // lookups

    pub fn audio(&self, id: AudioId) -> Result<&Audio> {
        self.audios.get(&id).ok_or(EngineError::UnknownAudio(id))
    }

    pub(crate) fn audio_mut(&mut self, id: AudioId) -> Result<&mut Audio> {
        self.audios.get_mut(&id).ok_or(EngineError::UnknownAudio(id))
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels.get(&id).ok_or(EngineError::UnknownChannel(id))
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel> {
        self.channels.get_mut(&id).ok_or(EngineError::UnknownChannel(id))
    }

    pub fn recycling(&self, id: RecyclingId) -> Result<&Recycling> {
        self.recyclings.get(&id).ok_or(EngineError::UnknownRecycling(id))
    }

    pub(crate) fn recycling_mut(&mut self, id: RecyclingId) -> Result<&mut Recycling> {
        self.recyclings
            .get_mut(&id)
            .ok_or(EngineError::UnknownRecycling(id))
    }

    pub fn context(&self, id: ContextId) -> Option<&RecyclingContext> {
        self.contexts.get(&id)
    }

    pub fn container(&self, id: ContainerId) -> Result<&RecallContainer> {
        self.containers
            .get(&id)
            .ok_or(EngineError::UnknownContainer(id))
    }

    pub fn voice(&self, id: RecallId) -> Result<&Voice> {
        self.voices.get(&id).ok_or(EngineError::UnknownRecallId(id))
    }

    pub(crate) fn voice_mut(&mut self, id: RecallId) -> Result<&mut Voice> {
        self.voices
            .get_mut(&id)
            .ok_or(EngineError::UnknownRecallId(id))
    }

    pub fn audio_ids(&self) -> impl Iterator<Item = AudioId> + '_ {
        self.audio_order.iter().copied()
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.audio_order
            .iter()
            .filter_map(|a| self.audios.get(a))
            .flat_map(|a| a.outputs.iter().chain(a.inputs.iter()).copied())
    }

    pub fn recall_ids(&self) -> impl Iterator<Item = RecallId> + '_ {
        self.voices.keys().copied().sorted()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &RecyclingContext> {
        self.contexts.values()
    }

    /// Voices without a parent, in creation order.
    pub fn root_voices(&self) -> Vec<RecallId> {
        self.voices
            .values()
            .filter(|v| v.parent().is_none())
            .map(|v| v.id())
            .sorted()
            .collect()
    }

    /// `id` and all of its descendants, parents before children.
    pub fn voice_tree(&self, id: RecallId) -> Vec<RecallId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(v) = stack.pop() {
            if let Some(voice) = self.voices.get(&v) {
                out.push(v);
                stack.extend(voice.children().iter().rev().copied());
            }
        }
        out
    }

    // chain relations

    /// The output a given input feeds inside its audio.
    pub fn line_output(&self, input: ChannelId) -> Option<ChannelId> {
        let channel = self.channels.get(&input)?;
        if channel.is_output() {
            return None;
        }
        let audio = self.audios.get(&channel.audio)?;
        let pad = if audio.flags.contains(AudioFlags::SYNC) {
            channel.pad
        } else {
            0
        };
        audio.channel_at(Direction::Output, pad, channel.audio_channel)
    }

    /// The inputs feeding a given output inside its audio, in pad order.
    pub fn line_inputs(&self, output: ChannelId) -> Vec<ChannelId> {
        let Some(channel) = self.channels.get(&output) else {
            return Vec::new();
        };
        if !channel.is_output() {
            return Vec::new();
        }
        let Some(audio) = self.audios.get(&channel.audio) else {
            return Vec::new();
        };
        if audio.flags.contains(AudioFlags::SYNC) {
            audio
                .channel_at(Direction::Input, channel.pad, channel.audio_channel)
                .into_iter()
                .collect()
        } else if channel.pad == 0 {
            (0..audio.input_pads)
                .filter_map(|pad| audio.channel_at(Direction::Input, pad, channel.audio_channel))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Recyclings of a channel's range, first to last.
    pub fn range_recyclings(&self, channel: ChannelId) -> Vec<RecyclingId> {
        let Some((first, last)) = self.channels.get(&channel).and_then(Channel::range) else {
            return Vec::new();
        };
        self.walk_recyclings(first, last)
    }

    pub(crate) fn walk_recyclings(&self, first: RecyclingId, last: RecyclingId) -> Vec<RecyclingId> {
        let mut out = Vec::new();
        let mut current = Some(first);
        while let Some(id) = current {
            if out.len() > self.recyclings.len() {
                tracing::warn!(?first, ?last, "recycling chain does not reach its end");
                break;
            }
            out.push(id);
            if id == last {
                break;
            }
            current = self.recyclings.get(&id).and_then(|r| r.next);
        }
        out
    }

    /// Verify the structural invariants of the whole tree.
    ///
    /// Checked: chain links agree with the chain order, ranges are contiguous
    /// and disjoint from same-direction siblings, links are symmetric, and
    /// every non-root recycling context appears exactly once in its parent.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for audio in self.audio_order.iter().filter_map(|a| self.audios.get(a)) {
            for direction in [Direction::Output, Direction::Input] {
                let chain = audio.chain(direction);
                if chain.len() != audio.pads(direction) * audio.audio_channels {
                    return Err(format!("{} {:?} chain has {} channels", audio.id, direction, chain.len()));
                }
                for (line, id) in chain.iter().enumerate() {
                    let c = self.channel(*id).map_err(|e| e.to_string())?;
                    if c.line != line || c.direction != direction || c.audio != audio.id {
                        return Err(format!("{id} misplaced in {} chain", audio.id));
                    }
                    let expected_prev = line.checked_sub(1).map(|l| chain[l]);
                    if c.prev != expected_prev || c.next != chain.get(line + 1).copied() {
                        return Err(format!("{id} has broken prev/next"));
                    }
                    let ac = audio.audio_channels;
                    let expected_prev_pad = line.checked_sub(ac).map(|l| chain[l]);
                    if c.prev_pad != expected_prev_pad || c.next_pad != chain.get(line + ac).copied() {
                        return Err(format!("{id} has broken prev_pad/next_pad"));
                    }
                }

                let mut seen = hashbrown::HashSet::new();
                for id in chain {
                    for r in self.range_recyclings(*id) {
                        if !seen.insert(r) {
                            return Err(format!("{r} shared by two {direction:?} ranges of {}", audio.id));
                        }
                    }
                }
            }
        }

        for c in self.channels.values() {
            if let Some((first, last)) = c.range() {
                let walked = self.walk_recyclings(first, last);
                if walked.last() != Some(&last) {
                    return Err(format!("{} range is not contiguous", c.id));
                }
            } else if c.first_recycling.is_some() || c.last_recycling.is_some() {
                return Err(format!("{} has a half-open range", c.id));
            }
            if let Some(own) = c.recycling {
                if c.range() != Some((own, own)) {
                    return Err(format!("{} does not span its own recycling", c.id));
                }
            }
            if let Some(link) = c.link {
                let other = self.channel(link).map_err(|e| e.to_string())?;
                if other.link != Some(c.id) || other.direction == c.direction {
                    return Err(format!("{} link to {link} is not symmetric", c.id));
                }
            }
        }

        for ctx in self.contexts.values() {
            if let Some(parent) = ctx.parent() {
                let p = self
                    .contexts
                    .get(&parent)
                    .ok_or_else(|| format!("{} has a dangling parent", ctx.id()))?;
                let count = p.children().iter().filter(|c| **c == ctx.id()).count();
                if count != 1 {
                    return Err(format!("{} listed {count} times in its parent", ctx.id()));
                }
            }
            for child in ctx.children() {
                let c = self
                    .contexts
                    .get(child)
                    .ok_or_else(|| format!("{} has a dangling child", ctx.id()))?;
                if c.parent() != Some(ctx.id()) {
                    return Err(format!("{child} does not point back to {}", ctx.id()));
                }
            }
        }

        Ok(())
    }

    /// Insert `id` into `channel`'s voice list keeping sound-scope order.
    pub(crate) fn attach_voice_to_channel(&mut self, channel: ChannelId, id: RecallId, scope: SoundScope) {
        let scopes: Vec<SoundScope> = match self.channels.get(&channel) {
            Some(c) => c
                .recall_ids
                .iter()
                .map(|r| self.voices.get(r).map_or(SoundScope::Playback, Voice::scope))
                .collect(),
            None => return,
        };
        if let Some(c) = self.channels.get_mut(&channel) {
            if c.recall_ids.contains(&id) {
                return;
            }
            let at = scopes
                .iter()
                .position(|s| s.index() > scope.index())
                .unwrap_or(c.recall_ids.len());
            c.recall_ids.insert(at, id);
            c.playback.set_recall_id(scope, Some(id));
        }
    }

    pub(crate) fn detach_voice_from_channel(&mut self, channel: ChannelId, id: RecallId, scope: SoundScope) {
        if let Some(c) = self.channels.get_mut(&channel) {
            c.recall_ids.retain(|r| *r != id);
            if c.playback.recall_id(scope) == Some(id) {
                let replacement = c.recall_ids.iter().rev().copied().find(|r| {
                    self.voices.get(r).map(Voice::scope) == Some(scope)
                });
                c.playback.set_recall_id(scope, replacement);
            }
        }
    }
}
