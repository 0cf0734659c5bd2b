pub mod indicators;
pub mod surge;


pub use indicators::*;
pub use surge::*;
