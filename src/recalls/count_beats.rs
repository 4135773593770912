use std::sync::Arc;

use crate::playback::SoundScopes;
use crate::recall::{Port, RecallBehavior, RecallContext, RecallLevel, RunStage};

/// Length keeper of sequencer and notation voices.
///
/// Counts tics from the first one the voice sees and reports done once
/// `length` tics went by, unless the clock loops.
#[derive(Clone, Debug)]
pub struct CountBeats {
    length: Arc<Port>,
    start: Option<u64>,
    done: bool,
}

impl CountBeats {
    pub fn new(length: u64) -> Self {
        Self {
            length: Port::new("length", length as f32),
            start: None,
            done: false,
        }
    }

    pub fn length(&self) -> &Arc<Port> {
        &self.length
    }

    /// Absolute tic the voice started on.
    pub fn start_tic(&self) -> Option<u64> {
        self.start
    }
}

impl RecallBehavior for CountBeats {
    fn name(&self) -> &'static str {
        "ags-count-beats"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::AudioRun
    }

    fn scopes(&self) -> SoundScopes {
        SoundScopes::SEQUENCER | SoundScopes::NOTATION
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn ports(&self) -> Vec<Arc<Port>> {
        vec![self.length.clone()]
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Pre {
            return;
        }
        let length = self.length.get().max(0.0) as u64;
        for tic in &ctx.cycle().tics {
            let start = *self.start.get_or_insert(tic.note_offset_absolute);
            if !ctx.cycle().loop_enabled && tic.note_offset_absolute - start >= length {
                if !self.done {
                    tracing::debug!(recall_id = %ctx.recall_id(), start, length, "sequence finished");
                }
                self.done = true;
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
