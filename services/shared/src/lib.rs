pub mod assets;
pub mod constants;
pub mod money;

pub use assets::*;
pub use constants::*;
pub use money::*;
