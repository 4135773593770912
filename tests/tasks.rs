mod common;

use std::thread;
use std::time::{Duration, Instant};

use ags_engine::task::{AddAudio, FnTask, Link, StartAudio, TaskOutput};
use ags_engine::{AudioFlags, Engine, EngineConfig, EngineError, NullSoundcard, SoundScope};

use common::*;

#[test]
fn queued_tasks_reply_with_their_outcome() {
    let (engine, _) = engine(64);

    let add = |name: &str| AddAudio {
        name: name.into(),
        flags: AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING,
        audio_channels: 1,
        output_pads: 1,
        input_pads: 1,
    };
    let a = match engine.queue(Box::new(add("a"))).unwrap().wait().unwrap() {
        TaskOutput::Audio(id) => id,
        other => panic!("unexpected {other:?}"),
    };
    let b = match engine.queue(Box::new(add("b"))).unwrap().wait().unwrap() {
        TaskOutput::Audio(id) => id,
        other => panic!("unexpected {other:?}"),
    };

    let (a_out, a_in, b_out, b_in) = {
        let tree = engine.tree();
        (output(&tree, a, 0), input(&tree, a, 0, 0), output(&tree, b, 0), input(&tree, b, 0, 0))
    };

    let link = Link {
        channel: a_out,
        target: Some(b_in),
    };
    assert_eq!(engine.queue(Box::new(link)).unwrap().wait().unwrap(), TaskOutput::None);

    // the reverse link would close a loop; the error comes back through the ticket
    let back = Link {
        channel: b_out,
        target: Some(a_in),
    };
    let err = engine.queue(Box::new(back)).unwrap().wait().unwrap_err();
    assert!(matches!(err, EngineError::LoopInLink { .. }));

    let started = engine
        .queue(Box::new(StartAudio {
            audio: b,
            scope: SoundScope::Playback,
        }))
        .unwrap()
        .wait()
        .unwrap();
    assert!(matches!(started, TaskOutput::Voices(ref v) if v.len() == 1));
    assert_eq!(engine.tasks_launched(), 5);
}

#[test]
fn closures_run_under_the_write_lock() {
    let (engine, _) = engine(64);
    let task = FnTask::new("two-synths", |tree: &mut ags_engine::Tree| -> ags_engine::Result<TaskOutput> {
        let a = synth(tree, 2);
        let b = synth(tree, 2);
        Ok(TaskOutput::Voices(
            tree.start_audio(a, SoundScope::Sequencer)?
                .into_iter()
                .chain(tree.start_audio(b, SoundScope::Sequencer)?)
                .collect(),
        ))
    });
    let ticket = engine.queue(Box::new(task)).unwrap();
    assert_eq!(ticket.name(), "two-synths");
    match ticket.wait().unwrap() {
        TaskOutput::Voices(v) => assert_eq!(v.len(), 4),
        other => panic!("unexpected {other:?}"),
    }

    let inline = engine
        .apply(Box::new(FnTask::new("count", |tree: &mut ags_engine::Tree| {
            assert_eq!(tree.root_voices().len(), 4);
            Ok(TaskOutput::None)
        })))
        .unwrap();
    assert_eq!(inline, TaskOutput::None);
}

#[test]
fn tasks_wait_for_the_tree() {
    let (engine, _) = engine(64);
    let guard = engine.tree_mut();

    let ticket = engine
        .queue(Box::new(FnTask::new("noop", |_: &mut ags_engine::Tree| Ok(TaskOutput::None))))
        .unwrap();
    let ticket = ticket.wait_timeout(Duration::from_millis(50)).unwrap_err();
    drop(guard);
    assert_eq!(ticket.wait().unwrap(), TaskOutput::None);
}

#[test]
fn full_queue_drops_tasks() {
    init_tracing();
    let config = EngineConfig {
        task_queue_capacity: 1,
        ..EngineConfig::default()
    }
    .with_presets(presets(64));
    let soundcard = NullSoundcard::new(config.presets);
    let engine = Engine::new(config, Box::new(soundcard)).unwrap();

    let noop = || Box::new(FnTask::new("noop", |_: &mut ags_engine::Tree| Ok(TaskOutput::None)));
    let guard = engine.tree_mut();
    let results: Vec<_> = (0..3).map(|_| engine.queue(noop())).collect();
    let dropped = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::TaskCancelled(_))))
        .count();
    assert!(dropped >= 1);
    drop(guard);

    for ticket in results.into_iter().flatten() {
        assert_eq!(ticket.wait().unwrap(), TaskOutput::None);
    }
    assert_eq!(engine.tasks_launched() as usize, 3 - dropped);
}

#[test]
fn cancel_is_deferred_while_the_tree_is_locked() {
    let (engine, _) = engine(64);
    let s = engine
        .add_audio("synth", AudioFlags::OUTPUT_HAS_RECYCLING, 1, 1, 1)
        .unwrap();
    let voices = engine.start_audio(s, SoundScope::Playback).unwrap();

    {
        let _guard = engine.tree_mut();
        // same thread holds the write lock; the cancel must not block
        engine.cancel(voices[0]).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.tasks_launched() == 0 {
        assert!(Instant::now() < deadline, "deferred cancel never ran");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(engine.tree().voice(voices[0]).unwrap().is_cancelled());
    assert_eq!(engine.run_cycle().voices_removed, 1);
}
