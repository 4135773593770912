use ags_engine::timing::TicEvent;
use ags_engine::Clock;

#[test]
fn tics_do_not_drift_over_long_runs() {
    const CYCLES: u64 = 100_000;
    let mut clock = Clock::new(44100, 1024, 120.0, 4);
    let mut tics: Vec<TicEvent> = Vec::new();
    let mut fired = 0u64;

    for cycle in 0..CYCLES {
        clock.advance(&mut tics);
        for tic in &tics {
            let frame = cycle * 1024 + tic.attack as u64;
            let exact = tic.note_offset_absolute as f64 * 5512.5;
            assert!(
                (frame as f64 - exact).abs() <= 1.0,
                "tic {} landed on {frame}, expected {exact}",
                tic.note_offset_absolute
            );
            assert_eq!(tic.note_offset_absolute, fired);
            fired += 1;
        }
    }

    assert_eq!(fired, 18_577);
    assert_eq!(clock.frames_elapsed(), CYCLES * 1024);
}

#[test]
fn at_most_one_tic_per_cycle_when_tics_are_longer_than_buffers() {
    let mut clock = Clock::new(48000, 512, 140.0, 4);
    let mut tics = Vec::new();
    for _ in 0..10_000 {
        clock.advance(&mut tics);
        assert!(tics.len() <= 1);
    }
}

#[test]
fn short_tics_can_fire_several_times_per_cycle() {
    // 100 frames per tic, 4096 frames per cycle
    let mut clock = Clock::new(1000, 4096, 600.0, 1);
    let mut tics = Vec::new();
    clock.advance(&mut tics);
    assert_eq!(tics.len(), 41);
    let attacks: Vec<usize> = tics.iter().map(|t| t.attack).take(3).collect();
    assert_eq!(attacks, vec![0, 100, 200]);
}

#[test]
fn seek_restarts_note_offsets() {
    let mut clock = Clock::new(1000, 10, 600.0, 1);
    let mut tics = Vec::new();
    clock.seek(16);
    clock.advance(&mut tics);
    assert_eq!(tics[0].note_offset, 16);
    for _ in 0..10 {
        clock.advance(&mut tics);
    }
    assert_eq!(clock.note_offset(), 17);
}
