//! Game logic: player state, the allocation core, context preparation, and
//! the per-player engine.

pub mod allocation;
pub mod context;
pub mod engine;
pub mod stats;

pub use context::{prepare_game_context, ContextStatus, GameContext};
pub use engine::{EngineState, GameEngine};
pub use stats::{EffortMode, GameSnapshot, PlayerStats};
