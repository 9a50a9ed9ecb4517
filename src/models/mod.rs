// Multitrack Output Models
// Data structures shared across services

mod go_live;
mod media;
mod settings;

pub use go_live::*;
pub use media::*;
pub use settings::*;
