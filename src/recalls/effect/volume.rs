use std::sync::Arc;

use crate::recall::{Port, RecallBehavior, RecallContext, RecallLevel, RunStage};

/// Scales the current buffers of a channel by port `volume`.
#[derive(Clone, Debug)]
pub struct Volume {
    volume: Arc<Port>,
}

impl Volume {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: Port::new("volume", volume),
        }
    }

    pub fn volume(&self) -> &Arc<Port> {
        &self.volume
    }
}

impl RecallBehavior for Volume {
    fn name(&self) -> &'static str {
        "ags-volume"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn ports(&self) -> Vec<Arc<Port>> {
        vec![self.volume.clone()]
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Inter {
            return;
        }
        let gain = self.volume.get();
        if gain == 1.0 {
            return;
        }
        let Some(channel) = ctx.binding().channel() else {
            return;
        };
        ctx.for_each_signal(channel, |signal| {
            if let Some(buffer) = signal.current_buffer_mut() {
                buffer.iter_mut().for_each(|s| *s *= gain);
            }
        });
    }
}
