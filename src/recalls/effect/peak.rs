use std::sync::Arc;

use crate::recall::{Port, RecallBehavior, RecallContext, RecallLevel, RunStage};

/// Publishes the absolute peak of a channel's current buffers in port `peak`.
#[derive(Clone, Debug)]
pub struct Peak {
    peak: Arc<Port>,
}

impl Default for Peak {
    fn default() -> Self {
        Self::new()
    }
}

impl Peak {
    pub fn new() -> Self {
        Self {
            peak: Port::new("peak", 0.0),
        }
    }

    pub fn peak(&self) -> &Arc<Port> {
        &self.peak
    }
}

impl RecallBehavior for Peak {
    fn name(&self) -> &'static str {
        "ags-peak"
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn ports(&self) -> Vec<Arc<Port>> {
        vec![self.peak.clone()]
    }

    fn run(&mut self, stage: RunStage, ctx: &RecallContext<'_>) {
        if stage != RunStage::Post {
            return;
        }
        let Some(channel) = ctx.binding().channel() else {
            return;
        };
        let mut peak = 0.0f32;
        ctx.for_each_signal(channel, |signal| {
            if let Some(buffer) = signal.current_buffer() {
                peak = buffer.iter().fold(peak, |p, s| p.max(s.abs()));
            }
        });
        self.peak.set(peak);
    }
}
