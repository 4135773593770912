//! Stream - owns the signals of one recycling for one voice

use crate::audio_signal::AudioSignal;
use crate::error::Result;
use crate::playback::SoundScope;
use crate::recall::{InitStage, RecallBehavior, RecallContext, RecallLevel, RunStage};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Role {
    #[default]
    Unresolved,
    /// Output recycling: keeps the voice's mixing destination
    Destination,
    /// Input recycling: plays the signals spawned into it
    Source,
}

/// Feeds the recycling template into a source signal when a playback voice
/// starts, keeps the per-voice destination signal on output recyclings and
/// moves every source cursor forward after each cycle.
///
/// Sources are dropped once fully played. An input stream is done when it
/// has no source left; an output stream is always done.
#[derive(Clone, Debug, Default)]
pub struct Stream {
    role: Role,
    live: usize,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source signals still playing after the last cycle.
    pub fn live_sources(&self) -> usize {
        self.live
    }
}

impl RecallBehavior for Stream {
    fn name(&self) -> &'static str {
        "ags-stream"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::Recycling
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn resolve(&mut self, ctx: &RecallContext<'_>) -> Result<()> {
        self.role = match ctx.channel() {
            Some(c) if c.is_output() => Role::Destination,
            Some(_) => Role::Source,
            None => Role::Unresolved,
        };
        Ok(())
    }

    fn init(&mut self, stage: InitStage, ctx: &RecallContext<'_>) -> Result<()> {
        if stage != InitStage::Allocate {
            return Ok(());
        }
        let Some(recycling) = ctx.recycling() else {
            return Ok(());
        };
        let id = ctx.recall_id();

        match self.role {
            Role::Destination => {
                let mut signals = recycling.signals();
                let exists = signals
                    .iter()
                    .any(|s| s.is_destination() && s.recall_id() == Some(id));
                if !exists {
                    let signal = AudioSignal::destination(ctx.presets()).bind(
                        ctx.tree().alloc_signal(),
                        recycling.id(),
                        id,
                    );
                    signals.push(signal);
                }
            }
            Role::Source if ctx.scope() == SoundScope::Playback => {
                if let Some(template) = recycling.template() {
                    ctx.spawn_signal(recycling.id(), template, template.frame_count(), 0, 1.0);
                    self.live = 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        let Some(recycling) = ctx.recycling() else {
            return;
        };
        let id = ctx.recall_id();

        match (self.role, stage) {
            (Role::Destination, RunStage::Pre) => {
                ctx.with_destination(recycling.id(), AudioSignal::ensure_current_cleared);
            }
            (Role::Source, RunStage::Post) => {
                let mut signals = recycling.signals();
                let mut live = 0;
                signals.retain_mut(|s| {
                    if s.recall_id() != Some(id) || s.is_destination() {
                        return true;
                    }
                    s.advance();
                    s.prune_consumed();
                    let keep = !s.is_exhausted();
                    live += usize::from(keep);
                    keep
                });
                self.live = live;
            }
            _ => {}
        }
    }

    fn is_done(&self) -> bool {
        match self.role {
            Role::Source => self.live == 0,
            _ => true,
        }
    }
}
