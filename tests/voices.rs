mod common;

use ags_engine::recall::{Binding, Recall, RecallBehavior};
use ags_engine::{Direction, SoundScope, Stage};

use common::*;

#[test]
fn contexts_form_a_tree() {
    let (engine, _) = engine(64);
    let (a, c_out) = {
        let mut tree = engine.tree_mut();
        let a = synth(&mut tree, 1);
        let b = master(&mut tree, 1);
        let c = master(&mut tree, 1);
        {
            let from = output(&tree, a, 0);
            let to = input(&tree, b, 0, 0);
            tree.set_link(from, Some(to)).unwrap();
        }
        {
            let from = output(&tree, b, 0);
            let to = input(&tree, c, 0, 0);
            tree.set_link(from, Some(to)).unwrap();
        }
        (a, output(&tree, c, 0))
    };

    let first = engine.start_voice(c_out, SoundScope::Playback).unwrap();
    let second = engine.start_voice(c_out, SoundScope::Sequencer).unwrap();

    let tree = engine.tree();
    tree.check_invariants().unwrap();
    assert_eq!(tree.contexts().count(), 6);

    for root in [first, second] {
        let voices = tree.voice_tree(root);
        assert_eq!(voices.len(), 3);

        // one chain: c <- b <- a
        let leaf = tree.voice(voices[2]).unwrap();
        assert_eq!(leaf.audio(), a);
        assert!(leaf.children().is_empty());

        for v in &voices[1..] {
            let voice = tree.voice(*v).unwrap();
            let ctx = tree.contexts().find(|c| c.id() == voice.context()).unwrap();
            let parent = ctx.parent().expect("non-root context has a parent");
            let listed = tree
                .contexts()
                .filter(|c| c.children().contains(&ctx.id()))
                .map(|c| c.id())
                .collect::<Vec<_>>();
            assert_eq!(listed, vec![parent]);
            assert_eq!(ctx.recall_id(), *v);
        }
    }
}

#[test]
fn removing_a_voice_tree_drops_its_contexts() {
    let (engine, _) = engine(64);
    let m_out = {
        let mut tree = engine.tree_mut();
        let a = synth(&mut tree, 1);
        let m = master(&mut tree, 1);
        {
            let from = output(&tree, a, 0);
            let to = input(&tree, m, 0, 0);
            tree.set_link(from, Some(to)).unwrap();
        }
        output(&tree, m, 0)
    };
    let root = engine.start_voice(m_out, SoundScope::Playback).unwrap();

    let mut tree = engine.tree_mut();
    assert_eq!(tree.contexts().count(), 2);
    assert_eq!(tree.remove_voice_tree(root), 2);
    assert_eq!(tree.contexts().count(), 0);
    assert!(tree.channel(m_out).unwrap().recall_ids().is_empty());
    tree.check_invariants().unwrap();
}

#[test]
fn every_voice_gets_its_own_instances() {
    let (engine, _) = engine(64);
    let s_out = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 1);
        wire_playback(engine.factory(), &mut tree, s);
        let template = constant(&tree.presets(), 0.25, 64 * 16);
        set_input_templates(&mut tree, s, &template);
        output(&tree, s, 0)
    };

    let first = engine.start_voice(s_out, SoundScope::Playback).unwrap();
    engine.render(2);
    let second = engine.start_voice(s_out, SoundScope::Playback).unwrap();
    let third = engine.start_voice(s_out, SoundScope::Playback).unwrap();
    engine.render(1);

    let tree = engine.tree();
    let ids = [first, second, third];
    assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 3);

    let frames_played = |id| {
        let voice = tree.voice(id).unwrap();
        voice
            .instances()
            .iter()
            .find_map(|live| match &*live.recall() {
                Recall::Play(p) => Some(p.frames_played()),
                _ => None,
            })
            .unwrap()
    };
    assert_eq!(frames_played(first), 3 * 64);
    assert_eq!(frames_played(second), 64);
    assert_eq!(frames_played(third), 64);

    // one source and one destination per voice
    let s_in = tree.line_partners(s_out)[1];
    let source_recycling = tree.channel(s_in).unwrap().own_recycling().unwrap();
    let dest_recycling = tree.channel(s_out).unwrap().own_recycling().unwrap();
    for id in ids {
        assert_eq!(tree.recycling(source_recycling).unwrap().signal_count(id), 1);
        assert_eq!(tree.recycling(dest_recycling).unwrap().signal_count(id), 1);
        let voice = tree.voice(id).unwrap();
        assert_eq!(voice.stage(), Stage::Run);
        assert_eq!(voice.instances().len(), tree.voice(first).unwrap().instances().len());
    }
}

#[test]
fn cancelled_voices_stop_running() {
    let (engine, _) = engine(64);
    let s = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 2);
        wire_playback(engine.factory(), &mut tree, s);
        let template = constant(&tree.presets(), 0.5, 64 * 32);
        set_input_templates(&mut tree, s, &template);
        s
    };
    let voices = engine.start_audio(s, SoundScope::Playback).unwrap();
    assert_eq!(voices.len(), 2);
    engine.render(2);

    engine.recursive_cancel(voices[0]).unwrap();

    let runs: Vec<u64> = {
        let tree = engine.tree();
        let voice = tree.voice(voices[0]).unwrap();
        assert!(voice.is_cancelled());
        assert!(voice.instances().iter().all(|l| l.is_cancelled()));
        voice.instances().iter().map(|l| l.run_count()).collect()
    };
    assert!(runs.iter().all(|r| *r > 0));

    let report = engine.run_cycle();
    assert_eq!(report.voices_removed, 1);

    let tree = engine.tree();
    assert!(tree.voice(voices[0]).is_err());
    let survivor = tree.voice(voices[1]).unwrap();
    assert!(survivor.is_running());
    assert!(survivor.instances().iter().all(|l| l.run_count() == 9));
    tree.check_invariants().unwrap();
}

#[test]
fn cancelled_instances_are_not_invoked_again() {
    let (engine, _) = engine(64);
    let s_out = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 1);
        wire_playback(engine.factory(), &mut tree, s);
        let template = constant(&tree.presets(), 0.5, 64 * 32);
        set_input_templates(&mut tree, s, &template);
        output(&tree, s, 0)
    };
    let id = engine.start_voice(s_out, SoundScope::Playback).unwrap();
    engine.render(1);

    // cancelling only flips flags, so the read lock is enough
    let tree = engine.tree();
    tree.cancel(id).unwrap();
    let voice = tree.voice(id).unwrap();
    assert!(!voice.is_running());
    let before: Vec<u64> = voice.instances().iter().map(|l| l.run_count()).collect();
    assert!(before.iter().all(|r| *r == 3));
    drop(tree);

    // the voice is still attached for this cycle but nothing of it runs
    let report = engine.run_cycle();
    assert_eq!(report.instances_run, 0);
    assert_eq!(report.voices_removed, 1);
    assert!(engine.tree().voice(id).is_err());
}

#[test]
fn finished_voice_trees_are_swept() {
    let (engine, capture) = engine(64);
    let m_out = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 1);
        let m = master(&mut tree, 1);
        wire_playback(engine.factory(), &mut tree, s);
        wire_playback(engine.factory(), &mut tree, m);
        let template = constant(&tree.presets(), 0.5, 64 * 3);
        set_input_templates(&mut tree, s, &template);
        {
            let from = output(&tree, s, 0);
            let to = input(&tree, m, 0, 0);
            tree.set_link(from, Some(to)).unwrap();
        }
        output(&tree, m, 0)
    };
    engine.start_voice(m_out, SoundScope::Playback).unwrap();

    let reports = engine.render(4);
    assert_eq!(reports[0].voices_removed, 0);
    assert_eq!(reports[2].voices_finished, 1);
    assert_eq!(reports[2].voices_removed, 2);
    assert_eq!(reports[3].instances_run, 0);
    assert_eq!(engine.tree().recall_ids().count(), 0);

    // left slot carries the synth through the master, right slot stays silent
    let buffers = capture.take();
    assert_eq!(buffers.len(), 4);
    for buffer in &buffers[..3] {
        assert!(buffer.chunks(2).all(|f| (f[0] - 0.5).abs() < 1e-6 && f[1] == 0.0));
    }
    assert!(buffers[3].iter().all(|s| *s == 0.0));
}

#[test]
fn resizing_keeps_running_voices_intact() {
    let (engine, _) = engine(64);
    let s = {
        let mut tree = engine.tree_mut();
        let s = synth(&mut tree, 2);
        wire_playback(engine.factory(), &mut tree, s);
        let template = constant(&tree.presets(), 0.5, 64 * 32);
        set_input_templates(&mut tree, s, &template);
        s
    };
    let mut voices = engine.start_audio(s, SoundScope::Playback).unwrap();
    voices.extend(engine.start_audio(s, SoundScope::Playback).unwrap());
    engine.render(2);

    let snapshot = |tree: &ags_engine::Tree| {
        let mut out = Vec::new();
        for id in &voices {
            let voice = tree.voice(*id).unwrap();
            for c in voice.channels().iter().take(2) {
                let channel = tree.channel(*c).unwrap();
                let signals: Vec<usize> = tree
                    .range_recyclings(*c)
                    .into_iter()
                    .map(|r| tree.recycling(r).unwrap().signal_count(*id))
                    .collect();
                out.push((*id, *c, channel.range(), signals));
            }
        }
        out
    };
    let before = snapshot(&engine.tree());

    engine.tree_mut().resize_pads(s, Direction::Input, 3).unwrap();

    let tree = engine.tree();
    tree.check_invariants().unwrap();
    assert_eq!(snapshot(&tree), before);
    for id in &voices {
        let voice = tree.voice(*id).unwrap();
        assert_eq!(voice.stage(), Stage::Run);
        assert_eq!(voice.channels().len(), 4);
        for c in &voice.channels()[2..] {
            assert!(tree.channel(*c).unwrap().direction() == Direction::Input);
            let instances = voice.instances_on(*c);
            assert!(!instances.is_empty());
            assert!(instances
                .iter()
                .any(|i| matches!(voice.instances()[*i].binding(), Binding::Recycling { .. })));
            assert!(instances.iter().all(|i| voice.instances()[*i].recall().name() != "ags-play"));
        }
    }
    drop(tree);

    // the new inputs join the next cycle without disturbing the old sources
    let report = engine.run_cycle();
    assert_eq!(report.voices_removed, 0);
}
