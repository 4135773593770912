mod play;

pub use play::Play;
