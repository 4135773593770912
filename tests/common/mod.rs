#![allow(dead_code)]

use std::sync::Once;

use ags_engine::recall::ChannelSelector;
use ags_engine::{
    AudioFlags, AudioId, AudioSignal, ChannelId, Direction, Placement, Presets, RecallFactory,
    SoundcardFormat, Tree,
};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn presets(buffer_size: usize) -> Presets {
    Presets::new(2, 44100, buffer_size, SoundcardFormat::S16)
}

pub fn tree(buffer_size: usize) -> Tree {
    init_tracing();
    Tree::new(presets(buffer_size))
}

/// A source audio: its inputs hold templates, its outputs mix them.
pub fn synth(tree: &mut Tree, audio_channels: usize) -> AudioId {
    let flags = AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING;
    tree.add_audio("synth", flags, audio_channels, 1, 1).unwrap()
}

/// A mixing audio whose inputs read whatever is linked into them.
pub fn master(tree: &mut Tree, audio_channels: usize) -> AudioId {
    tree.add_audio("master", AudioFlags::OUTPUT_HAS_RECYCLING, audio_channels, 1, 1)
        .unwrap()
}

pub fn output(tree: &Tree, audio: AudioId, audio_channel: usize) -> ChannelId {
    tree.audio(audio)
        .unwrap()
        .channel_at(Direction::Output, 0, audio_channel)
        .unwrap()
}

pub fn input(tree: &Tree, audio: AudioId, pad: usize, audio_channel: usize) -> ChannelId {
    tree.audio(audio)
        .unwrap()
        .channel_at(Direction::Input, pad, audio_channel)
        .unwrap()
}

/// Stream and copy on every voice, play only when started on this audio.
pub fn wire_playback(factory: &RecallFactory, tree: &mut Tree, audio: AudioId) {
    let all = Placement::OUTPUT | Placement::INPUT | Placement::RECALL;
    factory.create(tree, audio, "ags-stream", all, ChannelSelector::all()).unwrap();
    factory.create(tree, audio, "ags-copy", all, ChannelSelector::all()).unwrap();
    factory
        .create(tree, audio, "ags-play", Placement::OUTPUT | Placement::PLAY, ChannelSelector::all())
        .unwrap();
}

pub fn constant(presets: &Presets, value: f32, frames: usize) -> AudioSignal {
    AudioSignal::from_samples(presets, vec![value; frames])
}

pub fn ramp(presets: &Presets, frames: usize) -> AudioSignal {
    let samples: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
    AudioSignal::from_samples(presets, samples)
}

/// Put `template` on the own recycling of every input of `audio`.
pub fn set_input_templates(tree: &mut Tree, audio: AudioId, template: &AudioSignal) {
    let inputs = tree.audio(audio).unwrap().inputs().to_vec();
    for i in inputs {
        let recycling = tree.channel(i).unwrap().own_recycling().unwrap();
        tree.set_template(recycling, template.clone()).unwrap();
    }
}

pub fn engine(buffer_size: usize) -> (ags_engine::Engine, ags_engine::soundcard::Capture) {
    init_tracing();
    let config = ags_engine::EngineConfig::default().with_presets(presets(buffer_size));
    let soundcard = ags_engine::NullSoundcard::new(config.presets);
    let capture = soundcard.capture();
    let engine = ags_engine::Engine::new(config, Box::new(soundcard)).unwrap();
    (engine, capture)
}
