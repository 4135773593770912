//! PlayNotation - turns notes into signals on the input pads

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::notation::Notation;
use crate::playback::SoundScopes;
use crate::recall::{RecallBehavior, RecallContext, RecallLevel, RunStage};
use crate::tree::{ChannelId, Direction};

/// On every tic, spawns a signal for each note starting at the tic's note
/// offset into the input pad named by the note's `y`.
///
/// The notation is shared by the template and every live copy; editing it
/// affects running voices from the next tic on.
#[derive(Clone, Debug)]
pub struct PlayNotation {
    notation: Arc<RwLock<Notation>>,
    /// Input channels of the voice, indexed by pad
    targets: Vec<Vec<ChannelId>>,
    seen_channels: usize,
}

impl PlayNotation {
    pub fn new(notation: Arc<RwLock<Notation>>) -> Self {
        Self {
            notation,
            targets: Vec::new(),
            seen_channels: 0,
        }
    }

    pub fn notation(&self) -> &Arc<RwLock<Notation>> {
        &self.notation
    }

    fn collect_targets(&mut self, ctx: &RecallContext<'_>) {
        self.targets.clear();
        self.seen_channels = ctx.voice().channels().len();
        for c in ctx.voice().channels() {
            let Ok(channel) = ctx.tree().channel(*c) else {
                continue;
            };
            if channel.direction() != Direction::Input {
                continue;
            }
            if self.targets.len() <= channel.pad() {
                self.targets.resize(channel.pad() + 1, Vec::new());
            }
            self.targets[channel.pad()].push(*c);
        }
    }
}

impl RecallBehavior for PlayNotation {
    fn name(&self) -> &'static str {
        "ags-play-notation"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::AudioRun
    }

    fn scopes(&self) -> SoundScopes {
        SoundScopes::NOTATION
    }

    fn resolve(&mut self, ctx: &RecallContext<'_>) -> Result<()> {
        self.collect_targets(ctx);
        if self.targets.iter().all(Vec::is_empty) {
            return Err(EngineError::Resolve {
                recall: self.name(),
                recall_id: ctx.recall_id(),
                reason: "voice has no input channel to play notes into".into(),
            });
        }
        Ok(())
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Pre || ctx.cycle().tics.is_empty() {
            return;
        }
        // Pads may have been added since the last cycle.
        if ctx.voice().channels().len() != self.seen_channels {
            self.collect_targets(ctx);
        }

        let notation = self.notation.read();
        let frames_per_tic = ctx.cycle().frames_per_tic;

        for tic in &ctx.cycle().tics {
            for note in notation.starting_at(tic.note_offset) {
                let Some(channels) = self.targets.get(note.y) else {
                    tracing::trace!(pad = note.y, "note outside the input pads");
                    continue;
                };
                let frames = (note.length() as f64 * frames_per_tic).round() as u64;
                for c in channels {
                    let Some(recycling) = ctx.tree().channel(*c).ok().and_then(|c| c.own_recycling()) else {
                        continue;
                    };
                    let Some(template) = ctx.tree().recycling(recycling).ok().and_then(|r| r.template()) else {
                        continue;
                    };
                    ctx.spawn_signal(recycling, template, frames, tic.attack, note.velocity);
                }
            }
        }
    }
}
