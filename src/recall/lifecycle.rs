//! Voice lifecycle: building voice trees, duplicating templates into them,
//! walking them through RESOLVE and INIT, and tearing them down again.
//!
//! Everything here takes `&mut Tree` except cancellation and done marking,
//! which only flip atomics and so run under the read lock during a cycle.

use std::sync::atomic::Ordering;

use crate::audio_loop::CycleInfo;
use crate::error::Result;
use crate::playback::SoundScope;
use crate::tree::{AudioId, ChannelId, ContainerId, ContextId, Direction, RecallId, RecyclingId, Tree};

use super::{Binding, InitStage, LiveRecall, RecallBehavior, RecallContext, Stage, Voice};

/// Which templates to duplicate into a voice.
struct Selection<'s> {
    container: Option<ContainerId>,
    audio_level: bool,
    channels: &'s [ChannelId],
    /// Channel-run templates too, not only recycling-level ones
    channel_level: bool,
}

impl<'s> Selection<'s> {
    fn everything(channels: &'s [ChannelId]) -> Self {
        Self {
            container: None,
            audio_level: true,
            channels,
            channel_level: true,
        }
    }
}

impl Tree {
    /// A channel followed by its line partners inside its audio: an output
    /// and the inputs feeding it, or an input and the output it feeds.
    pub fn line_partners(&self, channel: ChannelId) -> Vec<ChannelId> {
        let mut out = vec![channel];
        match self.channels.get(&channel).map(|c| c.direction) {
            Some(Direction::Output) => out.extend(self.line_inputs(channel)),
            Some(Direction::Input) => out.extend(self.line_output(channel)),
            None => {}
        }
        out
    }

    /// Start a voice on `channel`.
    ///
    /// Builds the voice tree (a child voice for every input linked upstream),
    /// duplicates templates top-down, then resolves and initializes every
    /// instance. On failure the whole tree is cancelled and removed and the
    /// error returned; other voices are not affected.
    pub fn start_voice(&mut self, channel: ChannelId, scope: SoundScope) -> Result<RecallId> {
        self.channel(channel)?;
        let root = self.build_voice(channel, scope, None)?;
        let ids = self.voice_tree(root);

        match self.bring_up(&ids) {
            Ok(()) => {
                self.touch();
                tracing::debug!(recall_id = %root, %channel, ?scope, voices = ids.len(), "voice started");
                Ok(root)
            }
            Err(e) => {
                tracing::warn!(recall_id = %root, %channel, error = %e, "voice failed to start, cancelling its tree");
                self.recursive_cancel(root)?;
                self.remove_voice_tree(root);
                Err(e)
            }
        }
    }

    /// Start one voice per output channel of `audio`.
    pub fn start_audio(&mut self, audio: AudioId, scope: SoundScope) -> Result<Vec<RecallId>> {
        let outputs = self.audio(audio)?.outputs.clone();
        outputs
            .into_iter()
            .map(|c| self.start_voice(c, scope))
            .collect()
    }

    fn build_voice(
        &mut self,
        channel: ChannelId,
        scope: SoundScope,
        parent: Option<(RecallId, ContextId)>,
    ) -> Result<RecallId> {
        let audio = self.channel(channel)?.audio;
        let id = self.alloc_recall_id();
        let context = self.add_context(parent.map(|p| p.1), scope, id);
        let channels = self.line_partners(channel);

        self.voices.insert(
            id,
            Voice::new(id, scope, context, audio, parent.map(|p| p.0), channels.clone()),
        );
        if let Some(p) = parent.and_then(|p| self.voices.get_mut(&p.0)) {
            p.children.push(id);
        }
        for c in &channels {
            self.attach_voice_to_channel(*c, id, scope);
        }
        self.audio_mut(audio)?.recall_ids.push(id);
        self.refresh_voice_context(id);

        let upstream: Vec<ChannelId> = channels
            .iter()
            .filter_map(|c| self.channels.get(c))
            .filter(|c| !c.is_output())
            .filter_map(|c| c.link)
            .collect();
        for output in upstream {
            self.build_voice(output, scope, Some((id, context)))?;
        }

        tracing::trace!(recall_id = %id, %channel, parent = ?parent.map(|p| p.0), "voice built");
        Ok(id)
    }

    /// Walk freshly built voices from EMBRYONIC to RUN.
    fn bring_up(&mut self, ids: &[RecallId]) -> Result<()> {
        for id in ids {
            self.voice_mut(*id)?.advance(Stage::Duplicate)?;
            let channels = self.voice(*id)?.channels.clone();
            let lives = self.duplicate(*id, &Selection::everything(&channels))?;
            self.voice_mut(*id)?.extend_instances(lives);
        }

        let mut stages = vec![Stage::Resolve];
        stages.extend(InitStage::ALL.map(Stage::Init));
        for stage in stages {
            for id in ids {
                self.voice_mut(*id)?.advance(stage)?;
            }
            for id in ids {
                self.prepare(*id, None, stage)?;
            }
        }

        for id in ids {
            self.voice_mut(*id)?.advance(Stage::Run)?;
        }
        Ok(())
    }

    /// Clone the selected templates for voice `id`, top-down: audio level,
    /// then channel run, then recycling level.
    fn duplicate(&self, id: RecallId, selection: &Selection<'_>) -> Result<Vec<LiveRecall>> {
        let voice = self.voice(id)?;
        let is_root = voice.parent.is_none();
        let scope = voice.scope;

        let containers: Vec<_> = self
            .audio(voice.audio)?
            .containers
            .iter()
            .filter(|c| selection.container.map_or(true, |only| only == **c))
            .filter_map(|c| self.containers.get(c))
            .filter(|c| c.placement.applies_to(is_root))
            .collect();

        let mut out = Vec::new();
        if selection.audio_level {
            for container in &containers {
                for (i, recall) in container.audio_run.iter().enumerate() {
                    if recall.scopes().includes(scope) {
                        out.push(LiveRecall::new(container.id, i, Binding::Audio, recall.clone()));
                    }
                }
            }
        }
        if selection.channel_level {
            for channel in selection.channels {
                for container in &containers {
                    let Some(templates) = container.channel_templates(*channel) else {
                        continue;
                    };
                    for (i, recall) in templates.channel_run.iter().enumerate() {
                        if recall.scopes().includes(scope) {
                            out.push(LiveRecall::new(container.id, i, Binding::Channel(*channel), recall.clone()));
                        }
                    }
                }
            }
        }
        for channel in selection.channels {
            let Some(recycling) = self.channel(*channel)?.recycling else {
                continue;
            };
            let binding = Binding::Recycling {
                channel: *channel,
                recycling,
            };
            for container in &containers {
                let Some(templates) = container.channel_templates(*channel) else {
                    continue;
                };
                for (i, recall) in templates.recycling.iter().enumerate() {
                    if recall.scopes().includes(scope) {
                        out.push(LiveRecall::new(container.id, i, binding, recall.clone()));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Run the RESOLVE or INIT hook of the given instances (all if `None`).
    fn prepare(&self, id: RecallId, only: Option<&[usize]>, stage: Stage) -> Result<()> {
        let voice = self.voice(id)?;
        let cycle = CycleInfo::idle(self.presets());
        let indices: Vec<usize> = match only {
            Some(only) => only.to_vec(),
            None => (0..voice.instances.len()).collect(),
        };

        for i in indices {
            let Some(live) = voice.instances.get(i) else {
                continue;
            };
            let ctx = RecallContext::new(self, voice, live.binding, &cycle, None);
            let mut recall = live.recall();
            match stage {
                Stage::Resolve => recall.resolve(&ctx)?,
                Stage::Init(init) => recall.init(init, &ctx)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Add instances to a running voice and bring them up to RUN. A failure
    /// cancels the voice's tree.
    fn extend_voice_instances(&mut self, id: RecallId, selection: Selection<'_>) {
        if self.voices.get(&id).map(Voice::stage) != Some(Stage::Run) {
            return;
        }
        let lives = match self.duplicate(id, &selection) {
            Ok(lives) if !lives.is_empty() => lives,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(recall_id = %id, error = %e, "duplication failed");
                return;
            }
        };
        let Some(indices) = self.voices.get_mut(&id).map(|v| v.extend_instances(lives)) else {
            return;
        };

        let mut stages = vec![Stage::Resolve];
        stages.extend(InitStage::ALL.map(Stage::Init));
        let outcome = stages
            .into_iter()
            .try_for_each(|stage| self.prepare(id, Some(indices.as_slice()), stage));

        if let Err(e) = outcome {
            let root = self.root_of(id);
            tracing::warn!(recall_id = %id, error = %e, "new instances failed to come up, cancelling voice tree");
            let _ = self.recursive_cancel(root);
        } else {
            tracing::debug!(recall_id = %id, instances = indices.len(), "instances added to running voice");
        }
    }

    fn root_of(&self, mut id: RecallId) -> RecallId {
        while let Some(parent) = self.voices.get(&id).and_then(Voice::parent) {
            id = parent;
        }
        id
    }

    /// Release instances taken out of voice `id`, dropping the signals they
    /// kept in their recyclings.
    fn release_instances(&self, id: RecallId, dropped: Vec<LiveRecall>) {
        for live in dropped {
            if let Some(r) = live.binding.recycling().and_then(|r| self.recyclings.get(&r)) {
                r.drop_signals_of(id);
            }
            live.recall.into_inner().release();
        }
    }

    /// Flag one voice cancelled. Its instances stop running from the next
    /// stage on; the voice and its subtree are removed at the next sweep.
    pub fn cancel(&self, id: RecallId) -> Result<()> {
        self.voice(id)?.mark_cancelled();
        tracing::debug!(recall_id = %id, "cancel requested");
        Ok(())
    }

    /// Flag a voice and every voice below it cancelled, children first.
    pub fn recursive_cancel(&self, id: RecallId) -> Result<()> {
        self.voice(id)?;
        for v in self.voice_tree(id).into_iter().rev() {
            if let Some(voice) = self.voices.get(&v) {
                voice.mark_cancelled();
            }
        }
        tracing::debug!(recall_id = %id, "recursive cancel requested");
        Ok(())
    }

    /// Flag voice trees whose completion leaves all reported done.
    ///
    /// A tree without any leaf runs until cancelled. Returns the number of
    /// trees that finished.
    pub fn mark_done(&self) -> usize {
        let mut finished = 0;
        for root in self.root_voices() {
            let voices: Vec<&Voice> = self
                .voice_tree(root)
                .iter()
                .filter_map(|v| self.voices.get(v))
                .collect();
            if voices.iter().any(|v| !v.is_running()) {
                continue;
            }

            let mut leaves = voices
                .iter()
                .flat_map(|v| v.instances.iter())
                .filter(|l| l.leaf && !l.is_cancelled())
                .peekable();
            if leaves.peek().is_none() {
                continue;
            }
            if leaves.all(LiveRecall::is_done) {
                for v in &voices {
                    v.done.store(true, Ordering::Release);
                }
                finished += 1;
                tracing::debug!(recall_id = %root, "voice tree done");
            }
        }
        finished
    }

    /// Remove every done or cancelled voice with its subtree. Returns the
    /// number of voices removed.
    pub fn sweep(&mut self) -> usize {
        let flagged = |v: &Voice| v.is_done() || v.is_cancelled();
        let tops: Vec<RecallId> = self
            .recall_ids()
            .filter(|id| {
                let Some(v) = self.voices.get(id) else {
                    return false;
                };
                let parent_flagged = v
                    .parent
                    .and_then(|p| self.voices.get(&p))
                    .is_some_and(flagged);
                flagged(v) && !parent_flagged
            })
            .collect();

        tops.into_iter().map(|id| self.remove_voice_tree(id)).sum()
    }

    /// Remove a voice and its subtree, children first. Returns the number
    /// of voices removed.
    pub fn remove_voice_tree(&mut self, id: RecallId) -> usize {
        let ids = self.voice_tree(id);
        if ids.is_empty() {
            return 0;
        }
        if let Some(parent) = self.voices.get(&id).and_then(Voice::parent) {
            if let Some(p) = self.voices.get_mut(&parent) {
                p.children.retain(|c| *c != id);
            }
        }
        for v in ids.iter().rev() {
            self.remove_voice(*v);
        }
        self.touch();
        ids.len()
    }

    fn remove_voice(&mut self, id: RecallId) {
        let Some(mut voice) = self.voices.remove(&id) else {
            return;
        };

        if !voice.stage.is_terminal() {
            let end = if voice.stage == Stage::Run && voice.is_done() && !voice.is_cancelled() {
                Stage::Done
            } else {
                Stage::Cancel
            };
            if let Err(e) = voice.advance(end) {
                tracing::warn!(recall_id = %id, error = %e, "could not end voice");
            }
        }
        if let Err(e) = voice.advance(Stage::Remove) {
            tracing::warn!(recall_id = %id, error = %e, "could not remove voice");
        }

        let instances = voice.instances.len();
        for live in voice.instances.drain(..) {
            live.recall.into_inner().release();
        }
        let signals: usize = self.recyclings.values().map(|r| r.drop_signals_of(id)).sum();
        for c in &voice.channels {
            self.detach_voice_from_channel(*c, id, voice.scope);
        }
        if let Some(a) = self.audios.get_mut(&voice.audio) {
            a.recall_ids.retain(|r| *r != id);
        }
        self.remove_context(voice.context);

        tracing::debug!(recall_id = %id, instances, signals, "voice removed");
    }

    // topology hooks

    /// A channel's own recycling changed: drop the instances bound to the
    /// old one and duplicate recycling-level templates for the new one.
    pub(crate) fn rehome_recycling_instances(
        &mut self,
        channel: ChannelId,
        old: Option<RecyclingId>,
        new: Option<RecyclingId>,
    ) {
        let voices = match self.channels.get(&channel) {
            Some(c) => c.recall_ids.clone(),
            None => return,
        };
        for id in voices {
            if let Some(old) = old {
                let binding = Binding::Recycling {
                    channel,
                    recycling: old,
                };
                let dropped = match self.voices.get_mut(&id) {
                    Some(v) => v.take_instances_where(|l| l.binding == binding),
                    None => continue,
                };
                self.release_instances(id, dropped);
            }
            if new.is_some() {
                self.extend_voice_instances(
                    id,
                    Selection {
                        container: None,
                        audio_level: false,
                        channels: &[channel],
                        channel_level: false,
                    },
                );
            }
        }
    }

    /// Give running voices the new channels of their line.
    pub(crate) fn map_new_channels(&mut self, audio: AudioId, created: &[ChannelId]) {
        if created.is_empty() {
            return;
        }
        let voices = self
            .audios
            .get(&audio)
            .map(|a| a.recall_ids.clone())
            .unwrap_or_default();

        for id in voices {
            let Some(voice) = self.voices.get(&id) else {
                continue;
            };
            let Some(root) = voice.root_channel() else {
                continue;
            };
            let wanted: Vec<ChannelId> = self
                .line_partners(root)
                .into_iter()
                .filter(|c| created.contains(c) && !voice.channels.contains(c))
                .collect();
            if wanted.is_empty() {
                continue;
            }

            let scope = voice.scope;
            if let Some(v) = self.voices.get_mut(&id) {
                v.channels.extend(wanted.iter().copied());
            }
            for c in &wanted {
                self.attach_voice_to_channel(*c, id, scope);
            }
            self.refresh_voice_context(id);
            self.extend_voice_instances(
                id,
                Selection {
                    container: None,
                    audio_level: false,
                    channels: &wanted,
                    channel_level: true,
                },
            );
            tracing::debug!(recall_id = %id, channels = wanted.len(), "voice mapped onto new channels");
        }
    }

    /// Take a channel that is about to disappear out of every voice.
    /// Voices rooted on it are removed.
    pub(crate) fn detach_channel_from_voices(&mut self, channel: ChannelId) {
        let voices = match self.channels.get(&channel) {
            Some(c) => c.recall_ids.clone(),
            None => return,
        };
        for id in voices {
            let Some(voice) = self.voices.get(&id) else {
                continue;
            };
            if voice.root_channel() == Some(channel) {
                self.remove_voice_tree(id);
                continue;
            }
            let scope = voice.scope;
            let dropped = match self.voices.get_mut(&id) {
                Some(v) => {
                    v.channels.retain(|c| *c != channel);
                    v.take_instances_where(|l| l.binding.channel() == Some(channel))
                }
                None => continue,
            };
            self.release_instances(id, dropped);
            self.detach_voice_from_channel(channel, id, scope);
            self.refresh_voice_context(id);
        }
    }

    /// Duplicate a new container's templates into the running voices of
    /// its audio.
    pub(crate) fn map_container_into_voices(&mut self, container: ContainerId) {
        let Ok(audio) = self.container(container).map(|c| c.audio) else {
            return;
        };
        let voices = self
            .audios
            .get(&audio)
            .map(|a| a.recall_ids.clone())
            .unwrap_or_default();
        for id in voices {
            let Some(channels) = self.voices.get(&id).map(|v| v.channels.clone()) else {
                continue;
            };
            self.extend_voice_instances(
                id,
                Selection {
                    container: Some(container),
                    audio_level: true,
                    channels: &channels,
                    channel_level: true,
                },
            );
        }
    }

    pub(crate) fn release_container_instances(&mut self, container: ContainerId) {
        let ids: Vec<RecallId> = self.voices.keys().copied().collect();
        for id in ids {
            let dropped = match self.voices.get_mut(&id) {
                Some(v) => v.take_instances_where(|l| l.container == container),
                None => continue,
            };
            self.release_instances(id, dropped);
        }
    }

    /// Remove the child voices that reached `input` through its link to
    /// `output`.
    pub(crate) fn drop_voices_across_link(&mut self, output: ChannelId, input: ChannelId) {
        let voices = self
            .channels
            .get(&input)
            .map(|c| c.recall_ids.clone())
            .unwrap_or_default();
        let doomed: Vec<RecallId> = voices
            .iter()
            .filter_map(|id| self.voices.get(id))
            .flat_map(|v| v.children.iter().copied())
            .filter(|child| {
                self.voices.get(child).and_then(Voice::root_channel) == Some(output)
            })
            .collect();
        for child in doomed {
            self.remove_voice_tree(child);
        }
    }
}
