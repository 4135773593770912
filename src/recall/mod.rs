//! The recall graph: templates, live instances and their lifecycle.
//!
//! A [`RecallContainer`] holds the templates of one effect bound to one
//! audio. Starting a voice duplicates those templates into live instances
//! owned by the voice's [`Voice`] record; only live instances ever run.
//!
//! Every recall kind is a variant of the closed [`Recall`] sum type and
//! implements [`RecallBehavior`]; `Recall` forwards to the variant through
//! `enum_delegate`.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error;
use crate::playback::SoundScopes;
use crate::recalls::{
    CopyChannel, CopyPattern, CountBeats, Mute, Peak, Play, PlayNotation, PluginRecall, Stream,
    Volume,
};

mod container;
mod context;
mod factory;
mod lifecycle;
mod port;
mod stage;
mod voice;

pub use container::{ChannelSelector, ChannelTemplates, RecallContainer};
pub use context::RecallContext;
pub use factory::{RecallBuilder, RecallFactory, Target};
pub use port::Port;
pub use stage::{InitStage, RunStage, Stage};
pub use voice::{Binding, LiveRecall, Voice};

pub use crate::tree::RecallId;

bitflags! {
    /// Where an effect is placed and which voices receive it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Placement: u32 {
        const OUTPUT = 1 << 0;
        const INPUT = 1 << 1;
        /// Only voices started on this audio (root voices)
        const PLAY = 1 << 2;
        /// Every voice running through this audio
        const RECALL = 1 << 3;
    }
}

impl Placement {
    /// Whether templates with this placement are duplicated for a voice.
    pub fn applies_to(self, is_root: bool) -> bool {
        if self.contains(Placement::RECALL) || !self.contains(Placement::PLAY) {
            true
        } else {
            is_root
        }
    }
}

/// Which part of the graph a live instance is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecallLevel {
    /// Runs once per voice for the whole audio
    AudioRun,
    /// Runs once per voice per channel
    ChannelRun,
    /// Runs once per voice per owned recycling
    Recycling,
}

/// Behaviour shared by every recall kind.
///
/// Stage hooks receive a [`RecallContext`] describing the voice and the
/// binding of the instance. `resolve` and `init` may fail; a failure cancels
/// the voice tree. `run` never fails: problems are logged and the instance
/// degrades to doing nothing.
pub trait RecallBehavior {
    /// Factory identifier of the kind.
    fn name(&self) -> &'static str;

    fn level(&self) -> RecallLevel;

    fn scopes(&self) -> SoundScopes {
        SoundScopes::all()
    }

    /// Completion leaves decide when a voice tree is done.
    fn is_leaf(&self) -> bool {
        false
    }

    /// Static control values shared with the template.
    fn ports(&self) -> Vec<Arc<Port>> {
        Vec::new()
    }

    fn resolve(&mut self, _ctx: &RecallContext<'_>) -> error::Result<()> {
        Ok(())
    }

    fn init(&mut self, _stage: InitStage, _ctx: &RecallContext<'_>) -> error::Result<()> {
        Ok(())
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>);

    fn is_done(&self) -> bool {
        false
    }

    /// Give back external resources before the instance is dropped.
    fn release(&mut self) {}
}

/// Every recall kind the engine knows.
#[enum_delegate::implement(RecallBehavior,
    pub trait RecallBehavior {
        fn name(&self) -> &'static str;
        fn level(&self) -> RecallLevel;
        fn scopes(&self) -> SoundScopes;
        fn is_leaf(&self) -> bool;
        fn ports(&self) -> Vec<Arc<Port>>;
        fn resolve(&mut self, ctx: &RecallContext<'_>) -> error::Result<()>;
        fn init(&mut self, stage: InitStage, ctx: &RecallContext<'_>) -> error::Result<()>;
        fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>);
        fn is_done(&self) -> bool;
        fn release(&mut self);
    }
)]
#[derive(Clone, Debug)]
pub enum Recall {
    Stream(Stream),
    Copy(CopyChannel),
    Volume(Volume),
    Mute(Mute),
    Peak(Peak),
    Play(Play),
    PlayNotation(PlayNotation),
    CopyPattern(CopyPattern),
    CountBeats(CountBeats),
    Plugin(PluginRecall),
}
