//! # Campus Sim Server
//!
//! Real-time game-state engine for a campus life-simulation game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CAMPUS SIM SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  world/          - Static reference data                     │
//! │  ├── catalog.rs  - Majors, course plans, achievements        │
//! │  └── balance.rs  - Numeric tuning (JSON with defaults)       │
//! │                                                              │
//! │  store/          - Player state                              │
//! │  ├── kv.rs       - Ephemeral TTL'd KV store, atomic updates  │
//! │  ├── repo.rs     - Per-player session facade                 │
//! │  └── save.rs     - Durable snapshot sync                     │
//! │                                                              │
//! │  game/           - Game logic                                │
//! │  ├── stats.rs    - Typed player state + normalization        │
//! │  ├── allocation.rs - Weighted effort allocation, exams       │
//! │  ├── context.rs  - Init / repair / rehydrate on connect      │
//! │  └── engine.rs   - Per-player tick loop + action dispatch    │
//! │                                                              │
//! │  content/        - Narrative generation (LLM or static)      │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── auth.rs     - Access-token validation                   │
//! │  ├── protocol.rs - Tagged-enum wire messages                 │
//! │  ├── session.rs  - Player ↔ channel mapping + reaper         │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! One engine instance runs per connected player, bounded by the connection
//! lifetime: a scheduled tick loop recomputes resource drain and mastery
//! growth, an action dispatcher mutates state synchronously, and narrative
//! generation runs in tracked fire-and-forget tasks that can never stall
//! resource accounting.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod content;
pub mod game;
pub mod network;
pub mod store;
pub mod world;

pub use config::Settings;
pub use game::engine::{EngineState, GameEngine};
pub use game::stats::{GameSnapshot, PlayerStats};
pub use network::server::{AppContext, GameServer};
pub use store::repo::PlayerRepository;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
