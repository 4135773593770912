//! Processing order of one cycle.
//!
//! Audios and channels form a dependency graph: an audio runs before its
//! channels, an input before the output it feeds, an output before the input
//! it is linked to. The schedule is that graph's topological order, cut into
//! batches of nodes with no dependency between them. Batches run one after
//! the other; nodes inside a batch may run in parallel.

use hashbrown::HashMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::tree::{AudioId, ChannelId, Direction, Tree};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScheduleNode {
    Audio(AudioId),
    Channel(ChannelId),
}

#[derive(Debug, Default)]
pub struct Schedule {
    batches: Vec<Vec<ScheduleNode>>,
    generation: Option<u64>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> &[Vec<ScheduleNode>] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Rebuild if the tree changed since the last build.
    pub fn refresh(&mut self, tree: &Tree) -> bool {
        if self.generation == Some(tree.generation()) {
            return false;
        }
        *self = Self::build(tree);
        true
    }

    pub fn build(tree: &Tree) -> Self {
        let mut graph: DiGraph<ScheduleNode, ()> = DiGraph::new();
        let mut audios = HashMap::new();
        let mut channels = HashMap::new();

        for audio in tree.audio_ids() {
            audios.insert(audio, graph.add_node(ScheduleNode::Audio(audio)));
        }
        for channel in tree.channel_ids() {
            channels.insert(channel, graph.add_node(ScheduleNode::Channel(channel)));
        }

        for (id, index) in &channels {
            let Ok(channel) = tree.channel(*id) else {
                continue;
            };
            if let Some(a) = audios.get(&channel.audio()) {
                graph.add_edge(*a, *index, ());
            }
            let downstream = match channel.direction() {
                Direction::Input => tree.line_output(*id),
                Direction::Output => channel.link(),
            };
            if let Some(d) = downstream.and_then(|d| channels.get(&d)) {
                graph.add_edge(*index, *d, ());
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(cycle) => {
                tracing::warn!(node = ?graph[cycle.node_id()], "dependency cycle, falling back to insertion order");
                graph.node_indices().collect()
            }
        };

        let mut level: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        let mut batches: Vec<Vec<ScheduleNode>> = Vec::new();
        for index in order {
            let l = graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter_map(|p| level.get(&p))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(index, l);
            if batches.len() <= l {
                batches.resize_with(l + 1, Vec::new);
            }
            batches[l].push(graph[index]);
        }

        tracing::trace!(batches = batches.len(), generation = tree.generation(), "schedule rebuilt");
        Self {
            batches,
            generation: Some(tree.generation()),
        }
    }
}
