//! Effect templates bound to one audio.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::notation::{Notation, Pattern};
use crate::soundcard::Presets;
use crate::tree::{AudioId, Channel, ChannelId, ContainerId, Direction, Tree};

use super::{Placement, Port, Recall, RecallBehavior, RecallBuilder, RecallLevel, Target};

/// Which channels of an audio an effect covers. Unbounded pad ranges grow
/// with the audio.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelSelector {
    pub pads: Option<Range<usize>>,
    pub audio_channels: Option<Range<usize>>,
}

impl ChannelSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn pads(pads: Range<usize>) -> Self {
        Self {
            pads: Some(pads),
            audio_channels: None,
        }
    }

    pub fn with_audio_channels(mut self, audio_channels: Range<usize>) -> Self {
        self.audio_channels = Some(audio_channels);
        self
    }

    pub fn covers(&self, channel: &Channel) -> bool {
        let pad = self.pads.as_ref().map_or(true, |r| r.contains(&channel.pad()));
        let ac = self
            .audio_channels
            .as_ref()
            .map_or(true, |r| r.contains(&channel.audio_channel()));
        pad && ac
    }

    pub(crate) fn validate(&self, pads: usize, audio_channels: usize) -> Result<()> {
        if let Some(r) = &self.pads {
            if r.start >= r.end || r.end > pads {
                return Err(EngineError::OutOfRange(format!(
                    "pads {r:?} outside 0..{pads}"
                )));
            }
        }
        if let Some(r) = &self.audio_channels {
            if r.start >= r.end || r.end > audio_channels {
                return Err(EngineError::OutOfRange(format!(
                    "audio channels {r:?} outside 0..{audio_channels}"
                )));
            }
        }
        Ok(())
    }
}

/// Templates and ports of one effect on one channel.
#[derive(Debug)]
pub struct ChannelTemplates {
    pub(crate) channel: ChannelId,
    pub(crate) ports: Vec<Arc<Port>>,
    pub(crate) channel_run: Vec<Recall>,
    pub(crate) recycling: Vec<Recall>,
}

impl ChannelTemplates {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn ports(&self) -> &[Arc<Port>] {
        &self.ports
    }

    pub fn channel_run(&self) -> &[Recall] {
        &self.channel_run
    }

    pub fn recycling(&self) -> &[Recall] {
        &self.recycling
    }
}

/// Template chain of one effect on one audio.
pub struct RecallContainer {
    pub(crate) id: ContainerId,
    pub(crate) audio: AudioId,
    pub(crate) name: String,
    pub(crate) placement: Placement,
    pub(crate) selector: ChannelSelector,
    pub(crate) audio_run: Vec<Recall>,
    pub(crate) channels: Vec<ChannelTemplates>,
    builder: RecallBuilder,
}

impl core::fmt::Debug for RecallContainer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecallContainer")
            .field("id", &self.id)
            .field("audio", &self.audio)
            .field("name", &self.name)
            .field("placement", &self.placement)
            .field("audio_run", &self.audio_run.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl RecallContainer {
    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn selector(&self) -> &ChannelSelector {
        &self.selector
    }

    pub fn audio_run(&self) -> &[Recall] {
        &self.audio_run
    }

    pub fn channel_templates(&self, channel: ChannelId) -> Option<&ChannelTemplates> {
        self.channels.iter().find(|t| t.channel == channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().map(|t| t.channel)
    }

    /// Port `name` of the templates on `channel`.
    pub fn port(&self, channel: ChannelId, name: &str) -> Option<Arc<Port>> {
        self.channel_templates(channel)?
            .ports
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Audio-level port `name`.
    pub fn audio_port(&self, name: &str) -> Option<Arc<Port>> {
        self.audio_run
            .iter()
            .flat_map(|r| r.ports())
            .find(|p| p.name() == name)
    }

    /// Notation shared by the play-notation templates of this container.
    pub fn notation(&self) -> Option<Arc<RwLock<Notation>>> {
        self.audio_run.iter().find_map(|r| match r {
            Recall::PlayNotation(p) => Some(p.notation().clone()),
            _ => None,
        })
    }

    /// Pattern of the copy-pattern template on `channel`.
    pub fn pattern(&self, channel: ChannelId) -> Option<Arc<RwLock<Pattern>>> {
        self.channel_templates(channel)?
            .channel_run
            .iter()
            .find_map(|r| match r {
                Recall::CopyPattern(p) => Some(p.pattern().clone()),
                _ => None,
            })
    }

    fn wants(&self, channel: &Channel) -> bool {
        let direction = match channel.direction() {
            Direction::Output => Placement::OUTPUT,
            Direction::Input => Placement::INPUT,
        };
        self.placement.contains(direction) && self.selector.covers(channel)
    }

    fn build_channel(&self, channel: &Channel, presets: &Presets) -> Result<ChannelTemplates> {
        let mut templates = ChannelTemplates {
            channel: channel.id(),
            ports: Vec::new(),
            channel_run: Vec::new(),
            recycling: Vec::new(),
        };
        for recall in (self.builder)(Target::Channel(channel), presets)? {
            templates.ports.extend(recall.ports());
            match recall.level() {
                RecallLevel::ChannelRun => templates.channel_run.push(recall),
                RecallLevel::Recycling => templates.recycling.push(recall),
                RecallLevel::AudioRun => {
                    tracing::warn!(recall = recall.name(), "audio-level recall built for a channel, ignored")
                }
            }
        }
        Ok(templates)
    }

    pub(crate) fn forget_channel(&mut self, channel: ChannelId) {
        self.channels.retain(|t| t.channel != channel);
    }
}

impl Tree {
    /// Bind a new effect to `audio`, building templates for the audio and
    /// every selected channel. Running voices on the audio receive live
    /// copies right away.
    pub fn add_container(
        &mut self,
        audio: AudioId,
        name: impl Into<String>,
        placement: Placement,
        selector: ChannelSelector,
        builder: RecallBuilder,
    ) -> Result<ContainerId> {
        let a = self.audio(audio)?;
        selector.validate(a.pads(Direction::Output).max(a.pads(Direction::Input)), a.audio_channels())?;
        let presets = self.presets();
        let id = self.alloc_container();
        let a = self.audio(audio)?;

        let mut container = RecallContainer {
            id,
            audio,
            name: name.into(),
            placement,
            selector,
            audio_run: Vec::new(),
            channels: Vec::new(),
            builder,
        };

        for recall in (container.builder)(Target::Audio(a), &presets)? {
            if recall.level() == RecallLevel::AudioRun {
                container.audio_run.push(recall);
            }
        }
        for c in a.outputs().iter().chain(a.inputs().iter()) {
            let channel = self.channel(*c)?;
            if container.wants(channel) {
                let templates = container.build_channel(channel, &presets)?;
                container.channels.push(templates);
            }
        }

        tracing::debug!(container = %id, %audio, name = %container.name, "recall container added");
        self.containers.insert(id, container);
        self.audio_mut(audio)?.containers.push(id);
        self.map_container_into_voices(id);
        self.touch();
        Ok(id)
    }

    /// Drop an effect and every live instance duplicated from it.
    pub fn remove_container(&mut self, container: ContainerId) -> Result<()> {
        let audio = self.container(container)?.audio;
        self.release_container_instances(container);
        self.containers.remove(&container);
        if let Ok(a) = self.audio_mut(audio) {
            a.containers.retain(|c| *c != container);
        }
        self.touch();
        Ok(())
    }

    /// Build templates for new channels on containers whose selector covers them.
    pub(crate) fn extend_containers(&mut self, audio: AudioId, created: &[ChannelId]) -> Result<()> {
        let presets = self.presets();
        let ids = self.audio(audio)?.containers.clone();
        for id in ids {
            let mut built = Vec::new();
            if let Some(container) = self.containers.get(&id) {
                for c in created {
                    let channel = self.channel(*c)?;
                    if container.channel_templates(*c).is_none() && container.wants(channel) {
                        built.push(container.build_channel(channel, &presets)?);
                    }
                }
            }
            if let Some(container) = self.containers.get_mut(&id) {
                container.channels.extend(built);
            }
        }
        Ok(())
    }
}
