mod copy;
mod mute;
mod peak;
mod plugin;
mod volume;

pub use copy::CopyChannel;
pub use mute::Mute;
pub use peak::Peak;
pub use plugin::*;
pub use volume::Volume;
