//! Named recall builders.

use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::notation::{Notation, Pattern};
use crate::recalls::{
    CopyChannel, CopyPattern, CountBeats, Mute, Peak, Play, PlayNotation, PluginAbi, PluginLoader,
    PluginRecall, Stream, Volume,
};
use crate::soundcard::Presets;
use crate::tree::{Audio, AudioId, Channel, ContainerId, Tree};

use super::{ChannelSelector, Placement, Recall};

/// What a builder is asked to produce templates for.
#[derive(Clone, Copy, Debug)]
pub enum Target<'a> {
    Audio(&'a Audio),
    Channel(&'a Channel),
}

/// Produces the templates of one effect for an audio or a channel.
///
/// Called once for the audio (keep only audio-level recalls) and once per
/// selected channel.
pub type RecallBuilder = Arc<dyn Fn(Target<'_>, &Presets) -> Result<Vec<Recall>> + Send + Sync>;

/// Registry mapping factory identifiers to builders.
///
/// `ladspa:`, `dssi:` and `lv2:` prefixed names are resolved through the
/// plugin loader registered for that ABI.
pub struct RecallFactory {
    builders: HashMap<String, RecallBuilder>,
    loaders: HashMap<PluginAbi, Arc<dyn PluginLoader>>,
}

impl fmt::Debug for RecallFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("RecallFactory")
            .field("builders", &names)
            .field("loaders", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for RecallFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn channel_only(f: impl Fn(&Channel) -> Option<Recall> + Send + Sync + 'static) -> RecallBuilder {
    Arc::new(move |target: Target<'_>, _: &Presets| {
        Ok(match target {
            Target::Channel(c) => f(c).into_iter().collect(),
            Target::Audio(_) => Vec::new(),
        })
    })
}

fn audio_only(f: impl Fn(&Audio) -> Recall + Send + Sync + 'static) -> RecallBuilder {
    Arc::new(move |target: Target<'_>, _: &Presets| {
        Ok(match target {
            Target::Audio(a) => vec![f(a)],
            Target::Channel(_) => Vec::new(),
        })
    })
}

impl RecallFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
            loaders: HashMap::new(),
        }
    }

    /// A factory knowing every built-in recall kind.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register("ags-stream", channel_only(|_| Some(Recall::Stream(Stream::new()))));
        factory.register(
            "ags-copy",
            channel_only(|c| (!c.is_output()).then(|| Recall::Copy(CopyChannel::new()))),
        );
        factory.register("ags-volume", channel_only(|_| Some(Recall::Volume(Volume::new(1.0)))));
        factory.register("ags-mute", channel_only(|_| Some(Recall::Mute(Mute::new(false)))));
        factory.register("ags-peak", channel_only(|_| Some(Recall::Peak(Peak::new()))));
        factory.register("ags-play", channel_only(|_| Some(Recall::Play(Play::new()))));
        factory.register(
            "ags-play-notation",
            audio_only(|_| Recall::PlayNotation(PlayNotation::new(Arc::new(RwLock::new(Notation::new()))))),
        );
        factory.register(
            "ags-copy-pattern",
            channel_only(|c| (!c.is_output()).then(|| Recall::CopyPattern(CopyPattern::new(Pattern::default())))),
        );
        factory.register("ags-count-beats", audio_only(|_| Recall::CountBeats(CountBeats::new(16))));
        factory
    }

    /// Register or replace a builder.
    pub fn register(&mut self, name: impl Into<String>, builder: RecallBuilder) -> &mut Self {
        self.builders.insert(name.into(), builder);
        self
    }

    /// Make plugins of the loader's ABI available by prefixed name.
    pub fn register_loader(&mut self, loader: Arc<dyn PluginLoader>) -> &mut Self {
        tracing::debug!(abi = ?loader.abi(), "plugin loader registered");
        self.loaders.insert(loader.abi(), loader);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name) || PluginAbi::parse(name).is_some_and(|(abi, _)| self.loaders.contains_key(&abi))
    }

    /// Builder for `name`. Plugin names load their descriptor here, once
    /// per container.
    pub fn builder(&self, name: &str) -> Result<RecallBuilder> {
        if let Some(builder) = self.builders.get(name) {
            return Ok(builder.clone());
        }
        let (abi, id) = PluginAbi::parse(name).ok_or_else(|| EngineError::UnknownRecall(name.to_owned()))?;
        let loader = self
            .loaders
            .get(&abi)
            .ok_or_else(|| EngineError::UnknownRecall(name.to_owned()))?;
        let descriptor = loader.load(id)?;
        Ok(channel_only(move |_| Some(Recall::Plugin(PluginRecall::new(descriptor.clone())))))
    }

    /// Bind the effect `name` to `audio`.
    pub fn create(
        &self,
        tree: &mut Tree,
        audio: AudioId,
        name: &str,
        placement: Placement,
        selector: ChannelSelector,
    ) -> Result<ContainerId> {
        let builder = self.builder(name)?;
        tree.add_container(audio, name, placement, selector, builder)
    }
}
