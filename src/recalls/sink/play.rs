//! Play - hands a channel's signals to the soundcard

use crate::recall::{RecallBehavior, RecallContext, RecallLevel, RunStage};

/// Mixes the current buffers of a channel's signals into the interleaved
/// soundcard buffer, at the slot of the channel's audio channel.
#[derive(Clone, Debug, Default)]
pub struct Play {
    /// Frames handed to the soundcard so far
    frames: u64,
}

impl Play {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_played(&self) -> u64 {
        self.frames
    }
}

impl RecallBehavior for Play {
    fn name(&self) -> &'static str {
        "ags-play"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Post {
            return;
        }
        let Some(channel) = ctx.channel() else {
            return;
        };
        let audio_channel = channel.audio_channel();
        ctx.for_each_signal(channel.id(), |signal| {
            if let Some(buffer) = signal.current_buffer() {
                ctx.mix_to_output(audio_channel, buffer, 1.0);
            }
        });
        self.frames += ctx.presets().buffer_size as u64;
    }
}
