//! The per-voice record behind a [`RecallId`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::error::{EngineError, Result};
use crate::playback::SoundScope;
use crate::tree::{AudioId, ChannelId, ContainerId, ContextId, RecallId, RecyclingId};

use super::{Recall, RecallBehavior, RecallLevel, Stage};

/// Where a live instance is attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Binding {
    Audio,
    Channel(ChannelId),
    Recycling {
        channel: ChannelId,
        recycling: RecyclingId,
    },
}

impl Binding {
    pub fn channel(self) -> Option<ChannelId> {
        match self {
            Binding::Audio => None,
            Binding::Channel(c) | Binding::Recycling { channel: c, .. } => Some(c),
        }
    }

    pub fn recycling(self) -> Option<RecyclingId> {
        match self {
            Binding::Recycling { recycling, .. } => Some(recycling),
            _ => None,
        }
    }
}

/// A template duplicated into one voice.
#[derive(Debug)]
pub struct LiveRecall {
    pub(crate) container: ContainerId,
    /// Position of the template inside its container's list
    pub(crate) template: usize,
    pub(crate) binding: Binding,
    pub(crate) name: &'static str,
    pub(crate) level: RecallLevel,
    pub(crate) leaf: bool,
    pub(crate) recall: Mutex<Recall>,
    pub(crate) done: AtomicBool,
    pub(crate) cancelled: AtomicBool,
    pub(crate) runs: AtomicU64,
}

impl LiveRecall {
    pub(crate) fn new(container: ContainerId, template: usize, binding: Binding, recall: Recall) -> Self {
        Self {
            container,
            template,
            binding,
            name: recall.name(),
            level: recall.level(),
            leaf: recall.is_leaf(),
            recall: Mutex::new(recall),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        }
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn level(&self) -> RecallLevel {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    /// Lock the instance (its play/recall mutex).
    pub fn recall(&self) -> MutexGuard<'_, Recall> {
        self.recall.lock()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// How many RUN sub-stages this instance executed.
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}

/// One running voice: its place in the voice tree, its lifecycle stage and
/// the arena of its live instances.
#[derive(Debug)]
pub struct Voice {
    pub(crate) id: RecallId,
    pub(crate) scope: SoundScope,
    pub(crate) context: ContextId,
    pub(crate) audio: AudioId,
    pub(crate) parent: Option<RecallId>,
    pub(crate) children: Vec<RecallId>,
    /// Root channel first, then its line partners
    pub(crate) channels: Vec<ChannelId>,
    pub(crate) stage: Stage,
    pub(crate) cancelled: AtomicBool,
    pub(crate) done: AtomicBool,

    pub(crate) instances: Vec<LiveRecall>,
    audio_level: Vec<usize>,
    by_channel: HashMap<ChannelId, Vec<usize>>,
}

impl Voice {
    pub(crate) fn new(
        id: RecallId,
        scope: SoundScope,
        context: ContextId,
        audio: AudioId,
        parent: Option<RecallId>,
        channels: Vec<ChannelId>,
    ) -> Self {
        Self {
            id,
            scope,
            context,
            audio,
            parent,
            children: Vec::new(),
            channels,
            stage: Stage::Embryonic,
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            instances: Vec::new(),
            audio_level: Vec::new(),
            by_channel: HashMap::new(),
        }
    }

    pub fn id(&self) -> RecallId {
        self.id
    }

    pub fn scope(&self) -> SoundScope {
        self.scope
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn parent(&self) -> Option<RecallId> {
        self.parent
    }

    pub fn children(&self) -> &[RecallId] {
        &self.children
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// The channel the voice was started on.
    pub fn root_channel(&self) -> Option<ChannelId> {
        self.channels.first().copied()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `to` if the stage machine allows it.
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        if !self.stage.can_advance_to(to) {
            return Err(EngineError::IllegalTransition {
                from: self.stage,
                to,
            });
        }
        tracing::debug!(recall_id = %self.id, from = ?self.stage, ?to, "stage");
        self.stage = to;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// In RUN and neither done nor cancelled.
    pub fn is_running(&self) -> bool {
        self.stage == Stage::Run && !self.is_cancelled() && !self.is_done()
    }

    pub fn instances(&self) -> &[LiveRecall] {
        &self.instances
    }

    /// Audio-level instances, in container order.
    pub fn audio_instances(&self) -> &[usize] {
        &self.audio_level
    }

    /// Instances bound to `channel`: channel-level first, then recycling-level.
    pub fn instances_on(&self, channel: ChannelId) -> &[usize] {
        self.by_channel.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append instances; returns their positions.
    pub(crate) fn extend_instances(&mut self, lives: Vec<LiveRecall>) -> Vec<usize> {
        let start = self.instances.len();
        self.instances.extend(lives);
        self.reindex();
        (start..self.instances.len()).collect()
    }

    /// Remove the instances matching `pred` and hand them back for release.
    pub(crate) fn take_instances_where(&mut self, mut pred: impl FnMut(&LiveRecall) -> bool) -> Vec<LiveRecall> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.instances)
            .into_iter()
            .partition(|l| pred(l));
        self.instances = kept;
        self.reindex();
        dropped
    }

    fn reindex(&mut self) {
        self.audio_level.clear();
        self.by_channel.clear();
        for (i, live) in self.instances.iter().enumerate() {
            if let Some(channel) = live.binding.channel() {
                self.by_channel.entry(channel).or_default().push(i);
            } else {
                self.audio_level.push(i);
            }
        }
        let instances = &self.instances;
        for list in self.by_channel.values_mut() {
            list.sort_by_key(|i| matches!(instances[*i].binding, Binding::Recycling { .. }));
        }
    }

    /// Mark the voice and its instances cancelled.
    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
        for live in &self.instances {
            live.cancelled.store(true, Ordering::Release);
        }
    }
}
