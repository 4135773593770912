//! Recyclings and recycling ranges.
//!
//! Recyclings form one global doubly linked chain. Each channel spans a
//! contiguous segment of it, derived from the topology:
//!
//! - a channel owning a recycling spans exactly that recycling
//! - an input without one spans the range of the output it is linked to
//! - an output without one spans the ranges of its line inputs, spliced
//!   into one segment by linking the end of each input range to the start of
//!   the next
//!
//! Whenever a derived range changes the change travels downstream (input to
//! line output, output to linked input) and a [`RecyclingChanged`] event is
//! sent to every subscriber.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::audio_signal::{AudioSignal, SignalFlags};
use crate::error::{EngineError, Result};
use crate::tree::{ChannelId, Direction, RecallId, RecyclingId, Tree};

/// Per-channel container of sample streams.
#[derive(Debug)]
pub struct Recycling {
    pub(crate) id: RecyclingId,
    pub(crate) channel: Option<ChannelId>,
    pub(crate) prev: Option<RecyclingId>,
    pub(crate) next: Option<RecyclingId>,
    pub(crate) template: Option<Arc<AudioSignal>>,
    pub(crate) signals: Mutex<Vec<AudioSignal>>,
}

impl Recycling {
    pub(crate) fn new(id: RecyclingId, channel: Option<ChannelId>) -> Self {
        Self {
            id,
            channel,
            prev: None,
            next: None,
            template: None,
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> RecyclingId {
        self.id
    }

    /// The channel owning this recycling.
    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn prev(&self) -> Option<RecyclingId> {
        self.prev
    }

    pub fn next(&self) -> Option<RecyclingId> {
        self.next
    }

    pub fn template(&self) -> Option<&Arc<AudioSignal>> {
        self.template.as_ref()
    }

    /// Lock the live signal list.
    pub fn signals(&self) -> MutexGuard<'_, Vec<AudioSignal>> {
        self.signals.lock()
    }

    /// Number of live signals belonging to `recall_id`.
    pub fn signal_count(&self, recall_id: RecallId) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|s| s.recall_id() == Some(recall_id))
            .count()
    }

    pub(crate) fn drop_signals_of(&self, recall_id: RecallId) -> usize {
        let mut signals = self.signals.lock();
        let before = signals.len();
        signals.retain(|s| s.recall_id() != Some(recall_id));
        before - signals.len()
    }
}

/// Notification that a channel's range changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecyclingChanged {
    pub channel: ChannelId,
    pub old: Option<(RecyclingId, RecyclingId)>,
    pub new: Option<(RecyclingId, RecyclingId)>,
}

impl Tree {
    /// Create a recycling that belongs to no range yet.
    pub fn create_recycling(&mut self) -> RecyclingId {
        let id = self.alloc_recycling();
        self.recyclings.insert(id, Recycling::new(id, None));
        id
    }

    /// Rebind the recycling owned by `channel`.
    ///
    /// `Some(r)` makes the channel own `r` (which must not be part of any
    /// range), `None` releases the current one. The previous own recycling is
    /// removed together with its live signals. Ranges downstream are
    /// recomputed and running voices re-homed.
    pub fn set_recycling(&mut self, channel: ChannelId, recycling: Option<RecyclingId>) -> Result<()> {
        let old = self.channel(channel)?.recycling;
        if old == recycling {
            return Ok(());
        }
        if let Some(r) = recycling {
            let rec = self.recycling(r)?;
            if rec.channel.is_some() {
                return Err(EngineError::InvalidLink {
                    channel,
                    target: channel,
                    reason: "recycling already belongs to a channel",
                });
            }
            if self.channel(channel)?.direction == Direction::Input && self.channel(channel)?.link.is_some() {
                return Err(EngineError::InvalidLink {
                    channel,
                    target: channel,
                    reason: "a linked input cannot own a recycling",
                });
            }
        }

        if let Some(r) = recycling {
            self.recycling_mut(r)?.channel = Some(channel);
        }
        self.channel_mut(channel)?.recycling = recycling;
        self.rehome_recycling_instances(channel, old, recycling);
        if let Some(old) = old {
            self.remove_recycling(old);
        }
        self.update_range(channel);
        self.touch();
        Ok(())
    }

    /// Give `channel` a fresh recycling of its own.
    pub(crate) fn create_own_recycling(&mut self, channel: ChannelId) -> Result<RecyclingId> {
        let id = self.create_recycling();
        self.set_recycling(channel, Some(id))?;
        Ok(id)
    }

    pub(crate) fn remove_recycling(&mut self, id: RecyclingId) {
        let Some(removed) = self.recyclings.remove(&id) else {
            return;
        };
        // Close the gap so walks through the old position do not dangle.
        if let Some(prev) = removed.prev.and_then(|p| self.recyclings.get_mut(&p)) {
            if prev.next == Some(id) {
                prev.next = removed.next;
            }
        }
        if let Some(next) = removed.next.and_then(|n| self.recyclings.get_mut(&n)) {
            if next.prev == Some(id) {
                next.prev = removed.prev;
            }
        }
        tracing::trace!(recycling = %id, signals = removed.signals.lock().len(), "recycling removed");
    }

    /// Replace the template signal of a recycling.
    pub fn set_template(&mut self, recycling: RecyclingId, mut template: AudioSignal) -> Result<()> {
        template.flags.insert(SignalFlags::TEMPLATE);
        template.recycling = Some(recycling);
        template.recall_id = None;
        self.recycling_mut(recycling)?.template = Some(Arc::new(template));
        Ok(())
    }

    /// Range a channel should have given the current topology.
    pub(crate) fn compute_range(&self, channel: ChannelId) -> Option<(RecyclingId, RecyclingId)> {
        let c = self.channels.get(&channel)?;
        if let Some(own) = c.recycling {
            return Some((own, own));
        }
        match c.direction {
            Direction::Input => c.link.and_then(|o| self.channels.get(&o)).and_then(|o| o.range()),
            Direction::Output => {
                let ranges: Vec<_> = self
                    .line_inputs(channel)
                    .into_iter()
                    .filter_map(|i| self.channels.get(&i).and_then(|i| i.range()))
                    .collect();
                let first = ranges.first()?.0;
                let last = ranges.last()?.1;
                Some((first, last))
            }
        }
    }

    /// Connect consecutive input ranges of an output into one segment.
    fn splice_line_inputs(&mut self, output: ChannelId) {
        let ranges: Vec<_> = self
            .line_inputs(output)
            .into_iter()
            .filter_map(|i| self.channels.get(&i).and_then(|i| i.range()))
            .collect();

        for pair in ranges.windows(2) {
            let (left_last, right_first) = (pair[0].1, pair[1].0);
            if let Some(r) = self.recyclings.get_mut(&left_last) {
                r.next = Some(right_first);
            }
            if let Some(r) = self.recyclings.get_mut(&right_first) {
                r.prev = Some(left_last);
            }
        }
    }

    /// Recompute the range of `channel` and everything downstream of it.
    pub(crate) fn update_range(&mut self, channel: ChannelId) {
        let mut pending = vec![channel];
        let mut guard = 0usize;

        while let Some(current) = pending.pop() {
            guard += 1;
            if guard > self.channels.len() * 4 + 16 {
                tracing::warn!(%channel, "range propagation did not settle");
                break;
            }
            let Some(c) = self.channels.get(&current) else {
                continue;
            };
            let old = c.range();
            let direction = c.direction;
            let link = c.link;

            if direction == Direction::Output && c.recycling.is_none() {
                self.splice_line_inputs(current);
            }
            let new = self.compute_range(current);

            if old != new {
                if let Some(c) = self.channels.get_mut(&current) {
                    c.first_recycling = new.map(|r| r.0);
                    c.last_recycling = new.map(|r| r.1);
                }
                self.emit(RecyclingChanged {
                    channel: current,
                    old,
                    new,
                });
                self.refresh_context_recyclings(current);
            }

            // A splice inside an unchanged output range still changes what the
            // segment covers downstream, so outputs always forward.
            let forward = old != new || direction == Direction::Output;
            if !forward {
                continue;
            }
            match direction {
                Direction::Input => pending.extend(self.line_output(current)),
                Direction::Output => pending.extend(link),
            }
        }
    }
}
