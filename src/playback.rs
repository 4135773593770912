//! Per-channel binding of voices and worker threads to sound scopes.

use std::sync::Arc;

use bitflags::bitflags;

use crate::channel_thread::ChannelThread;
use crate::tree::RecallId;

/// What a voice is playing. Scopes run in the order listed in [`SoundScope::ALL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SoundScope {
    Playback,
    Sequencer,
    Notation,
    Wave,
    Midi,
}

impl SoundScope {
    pub const COUNT: usize = 5;

    pub const ALL: [SoundScope; Self::COUNT] = [
        SoundScope::Playback,
        SoundScope::Sequencer,
        SoundScope::Notation,
        SoundScope::Wave,
        SoundScope::Midi,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn flag(self) -> SoundScopes {
        match self {
            SoundScope::Playback => SoundScopes::PLAYBACK,
            SoundScope::Sequencer => SoundScopes::SEQUENCER,
            SoundScope::Notation => SoundScopes::NOTATION,
            SoundScope::Wave => SoundScopes::WAVE,
            SoundScope::Midi => SoundScopes::MIDI,
        }
    }
}

bitflags! {
    /// Set of scopes a recall kind participates in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SoundScopes: u8 {
        const PLAYBACK = 1 << 0;
        const SEQUENCER = 1 << 1;
        const NOTATION = 1 << 2;
        const WAVE = 1 << 3;
        const MIDI = 1 << 4;
    }
}

impl SoundScopes {
    pub fn includes(self, scope: SoundScope) -> bool {
        self.contains(scope.flag())
    }
}

/// For every sound scope: the voice last started on the channel and the
/// worker thread that runs the channel in super-threaded mode.
#[derive(Debug, Default)]
pub struct Playback {
    recall_ids: [Option<RecallId>; SoundScope::COUNT],
    channel_threads: [Option<Arc<ChannelThread>>; SoundScope::COUNT],
}

impl Playback {
    pub fn recall_id(&self, scope: SoundScope) -> Option<RecallId> {
        self.recall_ids[scope.index()]
    }

    pub fn set_recall_id(&mut self, scope: SoundScope, recall_id: Option<RecallId>) {
        self.recall_ids[scope.index()] = recall_id;
    }

    pub fn channel_thread(&self, scope: SoundScope) -> Option<&Arc<ChannelThread>> {
        self.channel_threads[scope.index()].as_ref()
    }

    /// Install a worker; returns the one it replaces.
    pub fn set_channel_thread(
        &mut self,
        scope: SoundScope,
        thread: Option<Arc<ChannelThread>>,
    ) -> Option<Arc<ChannelThread>> {
        std::mem::replace(&mut self.channel_threads[scope.index()], thread)
    }

    pub fn channel_threads(&self) -> impl Iterator<Item = &Arc<ChannelThread>> {
        self.channel_threads.iter().flatten()
    }
}
