//! Linking channels across audios.

use hashbrown::HashMap;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{EngineError, Result};
use crate::tree::{ChannelId, Direction, Tree};

/// Data-flow graph over channels: input to line output, output to linked input.
pub(crate) struct ChannelGraph {
    pub(crate) graph: DiGraph<ChannelId, ()>,
    pub(crate) indices: HashMap<ChannelId, NodeIndex>,
}

impl ChannelGraph {
    /// Build the graph, leaving out the current links of `skip`.
    pub(crate) fn build(tree: &Tree, skip: &[ChannelId]) -> Self {
        let mut graph = DiGraph::with_capacity(tree.channels.len(), tree.channels.len());
        let mut indices = HashMap::with_capacity(tree.channels.len());

        for id in tree.channel_ids() {
            indices.insert(id, graph.add_node(id));
        }

        for id in tree.channel_ids() {
            let Some(channel) = tree.channels.get(&id) else {
                continue;
            };
            let target = match channel.direction {
                Direction::Input => tree.line_output(id),
                Direction::Output if skip.contains(&id) => None,
                Direction::Output => channel.link.filter(|l| !skip.contains(l)),
            };
            if let Some((a, b)) = target.and_then(|t| indices.get(&id).zip(indices.get(&t))) {
                graph.add_edge(*a, *b, ());
            }
        }

        Self { graph, indices }
    }

    pub(crate) fn reaches(&self, from: ChannelId, to: ChannelId) -> bool {
        match (self.indices.get(&from), self.indices.get(&to)) {
            (Some(a), Some(b)) => has_path_connecting(&self.graph, *a, *b, None),
            _ => false,
        }
    }
}

impl Tree {
    /// Connect `channel` to `target`, or disconnect it with `None`.
    ///
    /// One side must be an output, the other an input; the order does not
    /// matter, the two must belong to different audios. Existing links of
    /// both endpoints are dropped first. Fails with [`EngineError::LoopInLink`]
    /// without touching the topology if the new link would close a cycle.
    pub fn set_link(&mut self, channel: ChannelId, target: Option<ChannelId>) -> Result<()> {
        let c = self.channel(channel)?;
        let Some(target) = target else {
            return self.unlink(channel);
        };
        let t = self.channel(target)?;

        if channel == target || c.direction == t.direction {
            return Err(EngineError::InvalidLink {
                channel,
                target,
                reason: "a link joins an output and an input",
            });
        }
        if c.audio == t.audio {
            return Err(EngineError::InvalidLink {
                channel,
                target,
                reason: "an audio cannot link to itself",
            });
        }
        if c.link == Some(target) {
            return Ok(());
        }

        let (output, input) = if c.is_output() {
            (channel, target)
        } else {
            (target, channel)
        };

        if self.would_loop(output, input) {
            tracing::debug!(%channel, %target, "link rejected: loop in link");
            return Err(EngineError::LoopInLink { channel, target });
        }

        self.unlink(output)?;
        self.unlink(input)?;

        // A linked input reads its upstream range instead of its own recycling.
        if self.channel(input)?.recycling.is_some() {
            self.set_recycling(input, None)?;
        }

        self.channel_mut(output)?.link = Some(input);
        self.channel_mut(input)?.link = Some(output);
        self.update_range(input);
        self.touch();

        tracing::debug!(%output, %input, "linked");
        Ok(())
    }

    /// Whether linking `output` to `input` would create a cycle.
    pub fn would_loop(&self, output: ChannelId, input: ChannelId) -> bool {
        let graph = ChannelGraph::build(self, &[output, input]);
        graph.reaches(input, output)
    }

    fn unlink(&mut self, channel: ChannelId) -> Result<()> {
        let Some(partner) = self.channel(channel)?.link else {
            return Ok(());
        };
        let (output, input) = if self.channel(channel)?.is_output() {
            (channel, partner)
        } else {
            (partner, channel)
        };

        self.drop_voices_across_link(output, input);

        self.channel_mut(output)?.link = None;
        if let Ok(i) = self.channel_mut(input) {
            i.link = None;
        }

        let regain = self
            .channel(input)
            .ok()
            .filter(|i| i.recycling.is_none())
            .and_then(|i| self.audios.get(&i.audio))
            .is_some_and(|a| a.has_recycling(Direction::Input));
        if regain {
            self.create_own_recycling(input)?;
        } else {
            self.update_range(input);
        }
        self.touch();

        tracing::debug!(%output, %input, "unlinked");
        Ok(())
    }
}
