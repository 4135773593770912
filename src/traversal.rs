//! Running live instances for one schedule node.

use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::audio_loop::CycleInfo;
use crate::playback::SoundScope;
use crate::recall::{LiveRecall, RecallBehavior, RecallContext, RunStage, Voice};
use crate::schedule::ScheduleNode;
use crate::tree::{AudioId, ChannelId, Tree};

/// Run `stage` of every running voice of `scope` on one schedule node.
/// Returns the number of instances invoked.
pub(crate) fn run_node(
    tree: &Tree,
    node: ScheduleNode,
    scope: SoundScope,
    stage: RunStage,
    cycle: &CycleInfo,
    output: Option<&Mutex<Vec<f32>>>,
) -> usize {
    match node {
        ScheduleNode::Audio(audio) => run_audio(tree, audio, scope, stage, cycle, output),
        ScheduleNode::Channel(channel) => run_channel(tree, channel, scope, stage, cycle, output),
    }
}

pub(crate) fn run_audio(
    tree: &Tree,
    audio: AudioId,
    scope: SoundScope,
    stage: RunStage,
    cycle: &CycleInfo,
    output: Option<&Mutex<Vec<f32>>>,
) -> usize {
    let Ok(a) = tree.audio(audio) else {
        return 0;
    };
    let mut count = 0;
    for voice in a.recall_ids().iter().filter_map(|id| tree.voice(*id).ok()) {
        if voice.scope() != scope || !voice.is_running() {
            continue;
        }
        for i in voice.audio_instances() {
            count += run_instance(tree, voice, *i, stage, cycle, output);
        }
    }
    count
}

pub(crate) fn run_channel(
    tree: &Tree,
    channel: ChannelId,
    scope: SoundScope,
    stage: RunStage,
    cycle: &CycleInfo,
    output: Option<&Mutex<Vec<f32>>>,
) -> usize {
    let Ok(c) = tree.channel(channel) else {
        return 0;
    };
    let mut count = 0;
    for voice in c.recall_ids().iter().filter_map(|id| tree.voice(*id).ok()) {
        if voice.scope() != scope || !voice.is_running() {
            continue;
        }
        for i in voice.instances_on(channel) {
            count += run_instance(tree, voice, *i, stage, cycle, output);
        }
    }
    count
}

fn run_instance(
    tree: &Tree,
    voice: &Voice,
    index: usize,
    stage: RunStage,
    cycle: &CycleInfo,
    output: Option<&Mutex<Vec<f32>>>,
) -> usize {
    let Some(live) = voice.instances().get(index) else {
        return 0;
    };
    if live.is_cancelled() {
        return 0;
    }
    let ctx = RecallContext::new(tree, voice, live.binding(), cycle, output);
    let mut recall = live.recall();
    recall.run(stage, &ctx);
    live.runs.fetch_add(1, Ordering::Relaxed);
    if stage == RunStage::Post {
        record_done(live, recall.is_done());
    }
    1
}

#[inline]
fn record_done(live: &LiveRecall, done: bool) {
    live.done.store(done, Ordering::Release);
}
