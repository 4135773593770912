//! The built-in recall kinds.
//!
//! - `source`: put signals into recyclings (stream, notation, pattern)
//! - `effect`: work on the signals of a channel (copy, volume, mute, peak, plugins)
//! - `sink`: take signals out of the graph (play)

pub mod effect;
pub mod sink;
pub mod source;

mod count_beats;

pub use count_beats::CountBeats;
pub use effect::{
    CopyChannel, Mute, Peak, PluginAbi, PluginDescriptor, PluginInstance, PluginLoader, PluginPort,
    PluginPortKind, PluginRecall, Volume,
};
pub use sink::Play;
pub use source::{CopyPattern, PlayNotation, Stream};
