//! CopyChannel - mixes an input's signals into its line output

use crate::recall::{RecallBehavior, RecallContext, RecallLevel, RunStage};

/// Sums the current buffers of every signal in the input's range (produced
/// by this voice or the upstream voice feeding it) and mixes the sum into
/// this voice's destination signal on the line output's recycling.
///
/// Does nothing while the line output owns no recycling.
#[derive(Clone, Debug, Default)]
pub struct CopyChannel {
    scratch: Vec<f32>,
}

impl CopyChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecallBehavior for CopyChannel {
    fn name(&self) -> &'static str {
        "ags-copy"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Inter {
            return;
        }
        let Some(input) = ctx.channel().filter(|c| !c.is_output()) else {
            return;
        };
        let Some(destination) = ctx
            .tree()
            .line_output(input.id())
            .and_then(|o| ctx.tree().channel(o).ok())
            .and_then(|o| o.own_recycling())
        else {
            return;
        };

        let frames = ctx.presets().buffer_size;
        self.scratch.clear();
        self.scratch.resize(frames, 0.0);

        let mut sources = 0usize;
        let scratch = &mut self.scratch;
        ctx.for_each_signal(input.id(), |signal| {
            if let Some(buffer) = signal.current_buffer() {
                for (d, s) in scratch.iter_mut().zip(buffer) {
                    *d += *s;
                }
                sources += 1;
            }
        });
        if sources == 0 {
            return;
        }

        // At most one signal list is locked at a time.
        ctx.with_destination(destination, |d| d.mix_into_current(&self.scratch, 1.0));
    }
}
