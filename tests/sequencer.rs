mod common;

use ags_engine::recall::ChannelSelector;
use ags_engine::soundcard::Capture;
use ags_engine::{
    AudioFlags, AudioId, Engine, EngineConfig, Note, NullSoundcard, Placement, Presets,
    SoundScope, SoundcardFormat,
};

use common::*;

const EVERY_VOICE: Placement = Placement::OUTPUT.union(Placement::INPUT).union(Placement::RECALL);

/// 100 frames per tic in buffers of 10: one tic every ten cycles.
fn slow_engine() -> (Engine, Capture) {
    init_tracing();
    let config = EngineConfig::default()
        .with_presets(Presets::new(2, 1000, 10, SoundcardFormat::S16))
        .with_bpm(600.0)
        .with_subdivisions(1);
    let soundcard = NullSoundcard::new(config.presets);
    let capture = soundcard.capture();
    (Engine::new(config, Box::new(soundcard)).unwrap(), capture)
}

fn mono_synth(engine: &Engine, input_pads: usize) -> AudioId {
    let flags = AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING;
    let s = engine.add_audio("synth", flags, 1, 1, input_pads).unwrap();
    for name in ["ags-stream", "ags-copy"] {
        engine.add_recall(s, name, EVERY_VOICE, ChannelSelector::all()).unwrap();
    }
    engine
        .add_recall(s, "ags-play", Placement::OUTPUT | Placement::PLAY, ChannelSelector::all())
        .unwrap();
    s
}

fn set_sequence_length(engine: &Engine, audio: AudioId, tics: u64) {
    let counter = engine
        .add_recall(audio, "ags-count-beats", EVERY_VOICE, ChannelSelector::all())
        .unwrap();
    let tree = engine.tree();
    tree.container(counter)
        .unwrap()
        .audio_port("length")
        .unwrap()
        .set(tics as f32);
}

fn loud_buffers(buffers: &[Vec<f32>]) -> Vec<usize> {
    buffers
        .iter()
        .enumerate()
        .filter(|(_, b)| b.iter().any(|s| *s != 0.0))
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn pattern_steps_trigger_the_template() {
    let (engine, capture) = slow_engine();
    let s = mono_synth(&engine, 1);
    let sequencer = engine
        .add_recall(s, "ags-copy-pattern", Placement::INPUT | Placement::RECALL, ChannelSelector::all())
        .unwrap();
    set_sequence_length(&engine, s, 4);

    {
        let mut tree = engine.tree_mut();
        let template = constant(&tree.presets(), 0.5, 20);
        set_input_templates(&mut tree, s, &template);

        let i = input(&tree, s, 0, 0);
        let pattern = tree.container(sequencer).unwrap().pattern(i).unwrap();
        let mut pattern = pattern.write();
        pattern.resize(4);
        pattern.set(0, true);
        pattern.set(2, true);
    }

    let voices = engine.start_audio(s, SoundScope::Sequencer).unwrap();
    assert_eq!(voices.len(), 1);

    let reports = engine.render(41);
    assert!(reports[..40].iter().all(|r| r.voices_finished == 0));
    assert_eq!(reports[40].voices_finished, 1);
    assert_eq!(reports[40].voices_removed, 1);

    let buffers = capture.take();
    assert_eq!(loud_buffers(&buffers), vec![0, 1, 20, 21]);
    for b in [0, 1, 20, 21] {
        assert!(buffers[b].chunks(2).all(|f| (f[0] - 0.5).abs() < 1e-6 && f[1] == 0.0));
    }
}

#[test]
fn notes_play_on_their_pads() {
    let (engine, capture) = slow_engine();
    let s = mono_synth(&engine, 2);
    let player = engine
        .add_recall(s, "ags-play-notation", EVERY_VOICE, ChannelSelector::all())
        .unwrap();
    set_sequence_length(&engine, s, 4);

    {
        let mut tree = engine.tree_mut();
        let presets = tree.presets();
        for (pad, level) in [(0, 0.25), (1, 0.5)] {
            let i = input(&tree, s, pad, 0);
            let recycling = tree.channel(i).unwrap().own_recycling().unwrap();
            tree.set_template(recycling, constant(&presets, level, 1000)).unwrap();
        }

        let notation = tree.container(player).unwrap().notation().unwrap();
        let mut notation = notation.write();
        notation.add_note(Note::new(2, 4, 1));
        notation.add_note(Note::new(0, 1, 0));
    }

    engine.start_audio(s, SoundScope::Notation).unwrap();
    let reports = engine.render(41);
    assert_eq!(reports[40].voices_finished, 1);

    // one tic of pad 0, then two tics of pad 1
    let buffers = capture.take();
    let loud = loud_buffers(&buffers);
    assert_eq!(loud, (0..10).chain(20..40).collect::<Vec<_>>());
    for (b, level) in [(0, 0.25), (9, 0.25), (20, 0.5), (39, 0.5)] {
        assert!(buffers[b].chunks(2).all(|f| (f[0] - level).abs() < 1e-6));
    }
}

#[test]
fn notation_without_inputs_fails_to_resolve() {
    let (engine, _) = slow_engine();
    let s = engine.add_audio("bare", AudioFlags::OUTPUT_HAS_RECYCLING, 1, 1, 0).unwrap();
    engine
        .add_recall(s, "ags-play-notation", EVERY_VOICE, ChannelSelector::all())
        .unwrap();

    assert!(engine.start_audio(s, SoundScope::Notation).is_err());
    assert_eq!(engine.tree().recall_ids().count(), 0);
}

#[test]
fn mute_silences_and_peak_follows() {
    let (engine, capture) = engine(64);
    let s = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 1);
        wire_playback(engine.factory(), &mut tree, s);
        let template = constant(&tree.presets(), 0.5, 64 * 8);
        set_input_templates(&mut tree, s, &template);
        s
    };
    let mute = engine
        .add_recall(s, "ags-mute", Placement::OUTPUT | Placement::RECALL, ChannelSelector::all())
        .unwrap();
    let peak = engine
        .add_recall(s, "ags-peak", Placement::OUTPUT | Placement::RECALL, ChannelSelector::all())
        .unwrap();

    let (muted, level) = {
        let tree = engine.tree();
        let o = output(&tree, s, 0);
        (
            tree.container(mute).unwrap().port(o, "muted").unwrap(),
            tree.container(peak).unwrap().port(o, "peak").unwrap(),
        )
    };

    engine.start_audio(s, SoundScope::Playback).unwrap();
    engine.render(1);
    assert!((level.get() - 0.5).abs() < 1e-6);

    muted.set(1.0);
    engine.render(1);
    assert_eq!(level.get(), 0.0);

    muted.set(0.0);
    engine.render(1);
    assert!((level.get() - 0.5).abs() < 1e-6);

    let buffers = capture.take();
    assert_eq!(loud_buffers(&buffers), vec![0, 2]);
}

#[test]
fn unknown_recalls_are_rejected() {
    let (engine, _) = engine(64);
    let s = engine.add_audio("synth", AudioFlags::OUTPUT_HAS_RECYCLING, 1, 1, 1).unwrap();
    let err = engine
        .add_recall(s, "ags-reverb", EVERY_VOICE, ChannelSelector::all())
        .unwrap_err();
    assert!(matches!(err, ags_engine::EngineError::UnknownRecall(ref name) if name == "ags-reverb"));
    assert!(!engine.factory().contains("ags-reverb"));
    assert!(engine.factory().contains("ags-copy-pattern"));
}
