//! ags-engine - a real-time audio engine.
//!
//! Audios own chains of output and input [channels](tree::Channel). Linking
//! an output to another audio's input shares [recyclings](recycling::Recycling),
//! the slots where [`AudioSignal`]s live. Effects are bound to audios as
//! [recall containers](recall::RecallContainer); starting a voice duplicates
//! their templates into live instances that the [`AudioLoop`] runs once per
//! soundcard cycle, stage by stage, in dependency order.
//!
//! Start with [`Engine`]; the [`Tree`] is available through it for anything
//! the engine does not wrap.

pub mod audio_loop;
pub mod audio_signal;
pub mod channel_thread;
pub mod config;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod notation;
pub mod playback;
pub mod recall;
pub mod recalls;
pub mod recycling;
pub mod recycling_context;
pub mod schedule;
pub mod soundcard;
pub mod task;
pub mod timing;
pub mod tree;

mod audio;
mod channel;
mod traversal;

pub use audio_loop::{AudioLoop, CycleInfo, CycleReport};
pub use audio_signal::{AudioSignal, Generator, SignalFlags, Waveform};
pub use config::{EngineConfig, LoopConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use notation::{Notation, Note, Pattern};
pub use playback::{SoundScope, SoundScopes};
pub use recall::{ChannelSelector, Placement, RecallFactory, Stage};
pub use soundcard::{NullSoundcard, Presets, Soundcard, SoundcardFormat};
pub use timing::Clock;
pub use tree::{AudioFlags, AudioId, ChannelId, Direction, RecallId, RecyclingId, Tree};

#[cfg(feature = "cpal_backend")]
pub use soundcard::CpalSoundcard;
