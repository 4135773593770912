use ags_engine::recall::ChannelSelector;
use ags_engine::{
    AudioFlags, AudioSignal, Clock, Engine, EngineConfig, Generator, NullSoundcard, Placement,
    Presets, SoundScope, SoundcardFormat, Waveform,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn engine_with_synths(synths: usize) -> (Engine, ags_engine::AudioId) {
    let presets = Presets::new(2, 48000, 512, SoundcardFormat::Float);
    let config = EngineConfig::default().with_presets(presets);
    let engine = Engine::new(config, Box::new(NullSoundcard::new(presets).without_capture())).unwrap();

    let flags = AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING;
    let every_voice = Placement::OUTPUT | Placement::INPUT | Placement::RECALL;
    let master = engine.add_audio("master", AudioFlags::OUTPUT_HAS_RECYCLING, 2, 1, synths).unwrap();
    for name in ["ags-stream", "ags-copy"] {
        engine.add_recall(master, name, every_voice, ChannelSelector::all()).unwrap();
    }
    engine
        .add_recall(master, "ags-play", Placement::OUTPUT | Placement::PLAY, ChannelSelector::all())
        .unwrap();

    for pad in 0..synths {
        let synth = engine.add_audio("synth", flags, 2, 1, 1).unwrap();
        for name in ["ags-stream", "ags-copy", "ags-volume"] {
            engine.add_recall(synth, name, every_voice, ChannelSelector::all()).unwrap();
        }

        let mut tree = engine.tree_mut();
        let generator = Generator::new(Waveform::Sine, 110.0 * (pad + 1) as f64);
        let template = AudioSignal::from_generator(&presets, generator, 48000 * 2);
        for ac in 0..2 {
            let input = tree.audio(synth).unwrap().channel_at(ags_engine::Direction::Input, 0, ac).unwrap();
            let recycling = tree.channel(input).unwrap().own_recycling().unwrap();
            tree.set_template(recycling, template.clone()).unwrap();

            let out = tree.audio(synth).unwrap().channel_at(ags_engine::Direction::Output, 0, ac).unwrap();
            let target = tree.audio(master).unwrap().channel_at(ags_engine::Direction::Input, pad, ac).unwrap();
            tree.set_link(out, Some(target)).unwrap();
        }
    }
    (engine, master)
}

/// Run one cycle, restarting the master once its sources ran out.
fn cycle(engine: &Engine, master: ags_engine::AudioId) -> ags_engine::CycleReport {
    if engine.tree().root_voices().is_empty() {
        engine.start_audio(master, SoundScope::Playback).unwrap();
    }
    engine.run_cycle()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("AudioSignal::feed 512 frames", |b| {
        let presets = Presets::new(2, 48000, 512, SoundcardFormat::Float);
        let template = AudioSignal::from_generator(&presets, Generator::new(Waveform::Sawtooth, 220.0), 48000);
        b.iter(|| {
            let mut signal = AudioSignal::new(&presets);
            signal.feed(&template, 512);
            black_box(signal)
        })
    });

    c.bench_function("Clock::advance", |b| {
        let mut clock = Clock::new(44100, 128, 174.0, 4);
        let mut tics = Vec::with_capacity(4);
        b.iter(|| {
            clock.advance(&mut tics);
            black_box(tics.len())
        })
    });

    c.bench_function("Engine::run_cycle 8 synths", |b| {
        let (engine, master) = engine_with_synths(8);
        b.iter(|| black_box(cycle(&engine, master)))
    });

    c.bench_function("Engine::run_cycle 8 synths, super-threaded", |b| {
        let (engine, master) = engine_with_synths(8);
        engine.set_super_threaded(true);
        b.iter(|| black_box(cycle(&engine, master)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
