mod common;

use ags_engine::{AudioSignal, Generator, Waveform};

use common::*;

fn flatten(signal: &AudioSignal) -> Vec<f32> {
    signal.buffers().iter().flatten().copied().collect()
}

#[test]
fn feeding_is_exact_for_any_buffer_size() {
    const FRAMES: usize = 10_000;

    for bs in [64, 256, 1024, 4096] {
        let presets = presets(bs);
        let template = ramp(&presets, FRAMES);
        let mut signal = AudioSignal::new(&presets);
        signal.feed(&template, FRAMES as u64);

        assert_eq!(signal.sample_count(), FRAMES as u64, "bs {bs}");
        assert_eq!(signal.buffers().len(), FRAMES.div_ceil(bs), "bs {bs}");

        let samples = flatten(&signal);
        for (i, s) in samples.iter().enumerate().take(FRAMES) {
            assert_eq!(*s, i as f32 / FRAMES as f32, "bs {bs} frame {i}");
        }
        assert!(samples[FRAMES..].iter().all(|s| *s == 0.0));
    }
}

#[test]
fn chunked_feed_matches_one_feed() {
    let presets = presets(256);
    let template = ramp(&presets, 3000);

    let mut whole = AudioSignal::new(&presets);
    whole.feed(&template, 3000);

    let mut chunked = AudioSignal::new(&presets);
    for chunk in [1u64, 255, 256, 700, 1788] {
        chunked.feed(&template, chunk);
    }

    assert_eq!(chunked.sample_count(), 3000);
    assert_eq!(flatten(&chunked), flatten(&whole));
}

#[test]
fn feeding_after_playback_keeps_consumed_buffers_dropped() {
    let presets = presets(64);
    let template = constant(&presets, 1.0, 64 * 4);
    let mut signal = AudioSignal::new(&presets);
    signal.feed(&template, 128);

    signal.advance();
    signal.prune_consumed();
    assert_eq!(signal.start(), 1);

    signal.feed(&template, 128);
    assert_eq!(signal.sample_count(), 256);
    assert_eq!(signal.end(), 4);
    assert_eq!(signal.buffers().len(), 3);
    assert!(flatten(&signal).iter().all(|s| *s == 1.0));
}

#[test]
fn advancing_past_the_end_exhausts() {
    let presets = presets(64);
    let template = constant(&presets, 0.5, 100);
    let mut signal = AudioSignal::new(&presets);
    signal.feed(&template, 100);

    assert_eq!(signal.current_buffer().map(<[f32]>::len), Some(64));
    signal.advance();
    assert!(!signal.is_exhausted());
    let tail = signal.current_buffer().unwrap();
    assert!(tail[..36].iter().all(|s| *s == 0.5));
    assert!(tail[36..].iter().all(|s| *s == 0.0));

    signal.advance();
    assert!(signal.is_exhausted());
    assert!(signal.current_buffer().is_none());
    signal.advance();
    assert_eq!(signal.current(), 2);
}

#[test]
fn generated_templates_feed_like_sampled_ones() {
    let presets = presets(128);
    let generator = Generator::new(Waveform::Sine, 440.0).with_amplitude(0.5);
    let template = AudioSignal::from_generator(&presets, generator, 1000);

    let mut signal = AudioSignal::new(&presets);
    signal.feed(&template, 1000);

    let samples = flatten(&signal);
    for (i, s) in samples.iter().enumerate().take(1000) {
        assert_eq!(*s, template.sample_at(i as u64));
        assert!(s.abs() <= 0.5 + 1e-6);
    }
}
