// Multitrack Output Commands
// Entry points used by the binary

mod probe;
mod system;

pub use probe::*;
pub use system::*;
