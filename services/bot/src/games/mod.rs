pub mod descriptors;
pub mod duel;
pub mod engine;
pub mod slots;

pub use descriptors::{descriptor_for, GameDescriptor};
pub use duel::{run_duel, DuelOutcome, DuelResult};
pub use engine::{ChanceSource, GameEngine, PredictionBet, PredictionOutcome, ThreadRngChance};
pub use slots::SlotsOutcome;
