use std::sync::Arc;

use crate::recall::{Port, RecallBehavior, RecallContext, RecallLevel, RunStage};

/// Silences the current buffers of a channel while port `muted` is on.
#[derive(Clone, Debug)]
pub struct Mute {
    muted: Arc<Port>,
}

impl Mute {
    pub fn new(muted: bool) -> Self {
        Self {
            muted: Port::new("muted", if muted { 1.0 } else { 0.0 }),
        }
    }

    pub fn muted(&self) -> &Arc<Port> {
        &self.muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.get() >= 0.5
    }
}

impl RecallBehavior for Mute {
    fn name(&self) -> &'static str {
        "ags-mute"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn ports(&self) -> Vec<Arc<Port>> {
        vec![self.muted.clone()]
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Inter || !self.is_muted() {
            return;
        }
        let Some(channel) = ctx.binding().channel() else {
            return;
        };
        ctx.for_each_signal(channel, |signal| {
            if let Some(buffer) = signal.current_buffer_mut() {
                buffer.fill(0.0);
            }
        });
    }
}
