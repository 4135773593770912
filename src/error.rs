//! Error types for engine operations.
//!
//! Structural operations (linking, resizing, adding recalls) report failures
//! synchronously through [`Result`]. The real-time path never returns these
//! across the audio thread; it logs and degrades instead.

use std::io;
use thiserror::Error;

use crate::recall::Stage;
use crate::tree::{AudioId, ChannelId, ContainerId, RecallId, RecyclingId};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or driving the graph.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested link would close a cycle in the channel graph.
    #[error("loop in link: linking {channel:?} to {target:?} would create a cycle")]
    LoopInLink {
        channel: ChannelId,
        target: ChannelId,
    },

    /// The two channels cannot be linked (same direction or same audio).
    #[error("invalid link between {channel:?} and {target:?}: {reason}")]
    InvalidLink {
        channel: ChannelId,
        target: ChannelId,
        reason: &'static str,
    },

    #[error("unknown audio {0:?}")]
    UnknownAudio(AudioId),

    #[error("unknown channel {0:?}")]
    UnknownChannel(ChannelId),

    #[error("unknown recycling {0:?}")]
    UnknownRecycling(RecyclingId),

    #[error("unknown recall container {0:?}")]
    UnknownContainer(ContainerId),

    #[error("unknown recall id {0:?}")]
    UnknownRecallId(RecallId),

    /// No recall is registered under this factory identifier.
    #[error("unknown recall `{0}`")]
    UnknownRecall(String),

    /// A recall range (pads, audio channels) falls outside the audio.
    #[error("selection out of range: {0}")]
    OutOfRange(String),

    /// Lifecycle transition not allowed by the stage machine.
    #[error("illegal stage transition from {from:?} to {to:?}")]
    IllegalTransition { from: Stage, to: Stage },

    /// A live recall could not resolve its sibling references.
    #[error("failed to resolve `{recall}` for {recall_id:?}: {reason}")]
    Resolve {
        recall: &'static str,
        recall_id: RecallId,
        reason: String,
    },

    /// The soundcard is held by another owner.
    #[error("soundcard busy: locked by `{owner}`")]
    SoundcardBusy { owner: String },

    /// Backend failure while opening or driving the soundcard.
    #[error("soundcard error: {0}")]
    Soundcard(String),

    #[error("invalid presets: {0}")]
    InvalidPresets(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Plugin loading or instantiation failed.
    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("failed to spawn thread `{name}`: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The task thread went away before the task ran.
    #[error("task `{0}` was cancelled before it ran")]
    TaskCancelled(String),
}
