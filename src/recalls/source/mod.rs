mod copy_pattern;
mod play_notation;
mod stream;

pub use copy_pattern::CopyPattern;
pub use play_notation::PlayNotation;
pub use stream::Stream;
