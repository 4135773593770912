//! Voice identity mirrored onto the recycling tree.
//!
//! Every voice gets one context. A voice started on a downstream channel owns
//! the root context; each upstream voice it pulls in gets a child context.
//! Recalls use the tree to find which voice produced the signals they read:
//! an input linked upstream looks for the child context covering its range.

use crate::playback::SoundScope;
use crate::tree::{ChannelId, ContextId, RecallId, RecyclingId, Tree};

#[derive(Debug)]
pub struct RecyclingContext {
    pub(crate) id: ContextId,
    pub(crate) parent: Option<ContextId>,
    pub(crate) children: Vec<ContextId>,
    pub(crate) scope: SoundScope,
    pub(crate) recall_id: RecallId,
    pub(crate) recyclings: Vec<RecyclingId>,
}

impl RecyclingContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    pub fn scope(&self) -> SoundScope {
        self.scope
    }

    pub fn recall_id(&self) -> RecallId {
        self.recall_id
    }

    pub fn recyclings(&self) -> &[RecyclingId] {
        &self.recyclings
    }

    pub fn covers(&self, recycling: RecyclingId) -> bool {
        self.recyclings.contains(&recycling)
    }
}

impl Tree {
    /// Create a context and hook it under `parent`.
    pub(crate) fn add_context(
        &mut self,
        parent: Option<ContextId>,
        scope: SoundScope,
        recall_id: RecallId,
    ) -> ContextId {
        let id = self.alloc_context();
        self.contexts.insert(
            id,
            RecyclingContext {
                id,
                parent,
                children: Vec::new(),
                scope,
                recall_id,
                recyclings: Vec::new(),
            },
        );
        if let Some(p) = parent.and_then(|p| self.contexts.get_mut(&p)) {
            if !p.children.contains(&id) {
                p.children.push(id);
            }
        }
        id
    }

    /// Unhook a context from its parent and drop it.
    pub(crate) fn remove_context(&mut self, id: ContextId) {
        let Some(ctx) = self.contexts.remove(&id) else {
            return;
        };
        if let Some(p) = ctx.parent.and_then(|p| self.contexts.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
        for child in ctx.children {
            if let Some(c) = self.contexts.get_mut(&child) {
                c.parent = None;
            }
        }
    }

    /// Recompute the recyclings covered by the context of a voice.
    pub(crate) fn refresh_voice_context(&mut self, recall_id: RecallId) {
        let Some(voice) = self.voices.get(&recall_id) else {
            return;
        };
        let context = voice.context();
        let mut recyclings: Vec<RecyclingId> = Vec::new();
        for c in voice.channels() {
            for r in self.range_recyclings(*c) {
                if !recyclings.contains(&r) {
                    recyclings.push(r);
                }
            }
        }
        if let Some(ctx) = self.contexts.get_mut(&context) {
            ctx.recyclings = recyclings;
        }
    }

    /// Refresh the contexts of every voice running on `channel`.
    pub(crate) fn refresh_context_recyclings(&mut self, channel: ChannelId) {
        let voices = match self.channels.get(&channel) {
            Some(c) => c.recall_ids.clone(),
            None => return,
        };
        for v in voices {
            self.refresh_voice_context(v);
        }
    }

    /// The voice that produces the signals in `recycling` on behalf of the
    /// voice owning `context`: the context itself or one of its descendants
    /// whose voice runs the recycling's owner channel.
    pub fn find_producer(&self, context: ContextId, recycling: RecyclingId) -> Option<RecallId> {
        let owner = self.recyclings.get(&recycling)?.channel?;
        let mut stack = vec![context];
        while let Some(id) = stack.pop() {
            let ctx = self.contexts.get(&id)?;
            if ctx.covers(recycling) {
                let runs_owner = self
                    .voices
                    .get(&ctx.recall_id)
                    .is_some_and(|v| v.channels().contains(&owner));
                if runs_owner {
                    return Some(ctx.recall_id);
                }
            }
            stack.extend(ctx.children.iter().copied());
        }
        None
    }
}
