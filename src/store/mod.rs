//! Ephemeral and durable state storage.

pub mod kv;
pub mod repo;
pub mod save;

pub use kv::{MemoryStore, StoreError};
pub use repo::PlayerRepository;
pub use save::{GameSaveRecord, SaveError, SaveStore};
