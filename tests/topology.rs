mod common;

use ags_engine::{AudioFlags, ChannelId, Direction, EngineError, Tree};

use common::*;

type Snapshot = Vec<(ChannelId, Option<ChannelId>, Option<(ags_engine::RecyclingId, ags_engine::RecyclingId)>)>;

fn snapshot(tree: &Tree) -> Snapshot {
    tree.channel_ids()
        .map(|id| {
            let c = tree.channel(id).unwrap();
            (id, c.link(), c.range())
        })
        .collect()
}

#[test]
fn loop_in_link_is_rejected_without_side_effects() {
    let mut tree = tree(64);
    let a = synth(&mut tree, 1);
    let b = master(&mut tree, 1);
    let c = master(&mut tree, 1);

    tree.set_link(output(&tree, a, 0), Some(input(&tree, b, 0, 0))).unwrap();
    tree.set_link(output(&tree, b, 0), Some(input(&tree, c, 0, 0))).unwrap();

    let before = snapshot(&tree);
    let generation = tree.generation();

    // c reaches a through b
    let err = tree
        .set_link(output(&tree, c, 0), Some(input(&tree, a, 0, 0)))
        .unwrap_err();
    assert!(matches!(err, EngineError::LoopInLink { .. }), "{err}");

    assert_eq!(snapshot(&tree), before);
    assert_eq!(tree.generation(), generation);
    tree.check_invariants().unwrap();
}

#[test]
fn linking_an_audio_to_itself_is_invalid() {
    let mut tree = tree(64);
    let flags = AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING;
    let a = tree.add_audio("a", flags, 1, 2, 1).unwrap();
    let before = snapshot(&tree);
    let generation = tree.generation();

    let second_output = tree.audio(a).unwrap().channel_at(Direction::Output, 1, 0).unwrap();
    for (from, to) in [
        (output(&tree, a, 0), input(&tree, a, 0, 0)),
        (second_output, input(&tree, a, 0, 0)),
        (input(&tree, a, 0, 0), second_output),
    ] {
        let result = tree.set_link(from, Some(to));
        assert!(matches!(result, Err(EngineError::InvalidLink { .. })), "{result:?}");
    }
    assert_eq!(snapshot(&tree), before);
    assert_eq!(tree.generation(), generation);
}

#[test]
fn same_direction_link_is_invalid() {
    let mut tree = tree(64);
    let a = synth(&mut tree, 1);
    let b = master(&mut tree, 1);

    let result = tree.set_link(output(&tree, a, 0), Some(output(&tree, b, 0)));
    assert!(matches!(result, Err(EngineError::InvalidLink { .. })));
}

#[test]
fn linked_input_shares_the_upstream_range() {
    let mut tree = tree(64);
    let a = synth(&mut tree, 2);
    let b = master(&mut tree, 2);
    let events = tree.subscribe();

    for ac in 0..2 {
        tree.set_link(output(&tree, a, ac), Some(input(&tree, b, 0, ac))).unwrap();
    }
    for ac in 0..2 {
        let upstream = tree.channel(output(&tree, a, ac)).unwrap().range();
        let downstream = tree.channel(input(&tree, b, 0, ac)).unwrap();
        assert!(upstream.is_some());
        assert_eq!(downstream.range(), upstream);
        assert_eq!(downstream.link(), Some(output(&tree, a, ac)));
    }
    tree.check_invariants().unwrap();

    let changed: Vec<_> = events.try_iter().map(|e| e.channel).collect();
    assert!(changed.contains(&input(&tree, b, 0, 0)));
    assert!(changed.contains(&input(&tree, b, 0, 1)));
}

#[test]
fn unlinking_restores_the_input() {
    let mut tree = tree(64);
    let a = synth(&mut tree, 1);
    let b = synth(&mut tree, 1);
    let b_in = input(&tree, b, 0, 0);
    let own = tree.channel(b_in).unwrap().own_recycling();
    assert!(own.is_some());

    tree.set_link(output(&tree, a, 0), Some(b_in)).unwrap();
    assert_eq!(tree.channel(b_in).unwrap().own_recycling(), None);

    tree.set_link(b_in, None).unwrap();
    let channel = tree.channel(b_in).unwrap();
    assert_eq!(channel.link(), None);
    assert!(channel.own_recycling().is_some());
    assert_eq!(channel.range().map(|r| r.0), channel.own_recycling());
    tree.check_invariants().unwrap();
}

#[test]
fn relinking_moves_the_link() {
    let mut tree = tree(64);
    let a = synth(&mut tree, 1);
    let b = master(&mut tree, 1);
    let c = master(&mut tree, 1);
    let a_out = output(&tree, a, 0);

    tree.set_link(a_out, Some(input(&tree, b, 0, 0))).unwrap();
    tree.set_link(a_out, Some(input(&tree, c, 0, 0))).unwrap();

    assert_eq!(tree.channel(input(&tree, b, 0, 0)).unwrap().link(), None);
    assert_eq!(tree.channel(input(&tree, b, 0, 0)).unwrap().range(), None);
    assert_eq!(tree.channel(a_out).unwrap().link(), Some(input(&tree, c, 0, 0)));
    tree.check_invariants().unwrap();
}

#[test]
fn resizing_keeps_chains_consistent() {
    let mut tree = tree(64);
    let flags = AudioFlags::OUTPUT_HAS_RECYCLING | AudioFlags::INPUT_HAS_RECYCLING;
    let a = tree.add_audio("drums", flags, 2, 1, 4).unwrap();

    tree.resize_pads(a, Direction::Input, 8).unwrap();
    assert_eq!(tree.audio(a).unwrap().inputs().len(), 16);
    tree.check_invariants().unwrap();

    tree.resize_audio_channels(a, 1).unwrap();
    assert_eq!(tree.audio(a).unwrap().inputs().len(), 8);
    assert_eq!(tree.audio(a).unwrap().outputs().len(), 1);
    tree.check_invariants().unwrap();

    tree.resize_pads(a, Direction::Input, 2).unwrap();
    assert_eq!(tree.audio(a).unwrap().inputs().len(), 2);
    tree.check_invariants().unwrap();
}

#[test]
fn removing_an_audio_unlinks_its_neighbours() {
    let mut tree = tree(64);
    let a = synth(&mut tree, 1);
    let b = master(&mut tree, 1);
    let b_in = input(&tree, b, 0, 0);
    tree.set_link(output(&tree, a, 0), Some(b_in)).unwrap();

    tree.remove_audio(a).unwrap();

    assert!(tree.audio(a).is_err());
    assert_eq!(tree.channel(b_in).unwrap().link(), None);
    assert_eq!(tree.channel(b_in).unwrap().range(), None);
    tree.check_invariants().unwrap();
}
