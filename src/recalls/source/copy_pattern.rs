//! CopyPattern - step sequencer for one input channel

use std::sync::Arc;

use parking_lot::RwLock;

use crate::notation::Pattern;
use crate::playback::SoundScopes;
use crate::recall::{RecallBehavior, RecallContext, RecallLevel, RunStage};

/// On every tic whose step is set in the pattern, spawns one signal with the
/// full template into the channel's own recycling.
#[derive(Clone, Debug)]
pub struct CopyPattern {
    pattern: Arc<RwLock<Pattern>>,
}

impl CopyPattern {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern: Arc::new(RwLock::new(pattern)),
        }
    }

    pub fn pattern(&self) -> &Arc<RwLock<Pattern>> {
        &self.pattern
    }
}

impl RecallBehavior for CopyPattern {
    fn name(&self) -> &'static str {
        "ags-copy-pattern"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn scopes(&self) -> SoundScopes {
        SoundScopes::SEQUENCER
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Pre {
            return;
        }
        let Some(recycling) = ctx.channel().and_then(|c| c.own_recycling()) else {
            return;
        };
        let Some(template) = ctx.tree().recycling(recycling).ok().and_then(|r| r.template()) else {
            return;
        };

        let pattern = self.pattern.read();
        for tic in &ctx.cycle().tics {
            if pattern.is_set(pattern.step_at(tic.note_offset)) {
                ctx.spawn_signal(recycling, template, template.frame_count(), tic.attack, 1.0);
            }
        }
    }
}
