//! Offline render: two sine synths mixed by a master, written as raw s16le.
//!
//! Run with: cargo run --example offline_render -- out.raw
//! Play with: aplay -f S16_LE -c 2 -r 44100 out.raw

use std::time::Instant;

use ags_engine::recall::ChannelSelector;
use ags_engine::{
    AudioFlags, AudioSignal, Direction, Engine, EngineConfig, Generator, NullSoundcard, Placement,
    SoundScope, SoundcardFormat, Waveform,
};

const SECONDS: usize = 4;

fn main() -> ags_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "offline_render.raw".into());

    let config = EngineConfig::default().with_bpm(96.0);
    let presets = config.presets;
    let soundcard = NullSoundcard::new(presets);
    let capture = soundcard.capture();
    let engine = Engine::new(config, Box::new(soundcard))?;

    let every_voice = Placement::OUTPUT | Placement::INPUT | Placement::RECALL;
    let master = engine.add_audio("master", AudioFlags::OUTPUT_HAS_RECYCLING, 2, 1, 2)?;
    engine.add_recall(master, "ags-stream", every_voice, ChannelSelector::all())?;
    engine.add_recall(master, "ags-copy", every_voice, ChannelSelector::all())?;
    let volume = engine.add_recall(master, "ags-volume", Placement::OUTPUT | Placement::RECALL, ChannelSelector::all())?;
    engine.add_recall(master, "ags-play", Placement::OUTPUT | Placement::PLAY, ChannelSelector::all())?;

    for (pad, frequency) in [(0, 220.0), (1, 330.0)] {
        let synth = engine.add_audio(
            "synth",
            AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING,
            2,
            1,
            1,
        )?;
        engine.add_recall(synth, "ags-stream", every_voice, ChannelSelector::all())?;
        engine.add_recall(synth, "ags-copy", every_voice, ChannelSelector::all())?;

        let generator = Generator::new(Waveform::Sine, frequency).with_amplitude(0.4);
        let template = AudioSignal::from_generator(&presets, generator, (presets.samplerate as usize * SECONDS) as u64);

        let mut tree = engine.tree_mut();
        for ac in 0..2 {
            let channels = tree.audio(synth)?;
            let input = channels.channel_at(Direction::Input, 0, ac);
            let output = channels.channel_at(Direction::Output, 0, ac);
            let target = tree.audio(master)?.channel_at(Direction::Input, pad, ac);
            let (Some(input), Some(output), Some(target)) = (input, output, target) else {
                continue;
            };
            if let Some(recycling) = tree.channel(input)?.own_recycling() {
                tree.set_template(recycling, template.clone())?;
            }
            tree.set_link(output, Some(target))?;
        }
    }

    // the master's volume port is shared by every voice
    {
        let tree = engine.tree();
        let container = tree.container(volume)?;
        for channel in container.channels() {
            if let Some(port) = container.port(channel, "volume") {
                port.set(0.8);
            }
        }
    }

    engine.start_audio(master, SoundScope::Playback)?;

    let started = Instant::now();
    let mut cycles = 0;
    let mut tics = 0;
    loop {
        let report = engine.run_cycle();
        cycles += 1;
        tics += report.tics;
        if engine.tree().root_voices().is_empty() {
            break;
        }
    }
    let elapsed = started.elapsed();

    let bytes = capture.take_encoded(SoundcardFormat::S16);
    std::fs::write(&path, &bytes)?;

    let audio_seconds = cycles as f64 * presets.buffer_seconds();
    println!(
        "rendered {audio_seconds:.2}s ({cycles} cycles, {tics} tics) in {:.1}ms, {:.0}x real time",
        elapsed.as_secs_f64() * 1000.0,
        audio_seconds / elapsed.as_secs_f64()
    );
    println!("wrote {} bytes to {path}", bytes.len());
    Ok(())
}
