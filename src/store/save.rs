//! Durable Snapshot Sync
//!
//! Copies a player's ephemeral snapshot into durable storage and back. One
//! JSON file per (player, slot) pair with upsert semantics: persisting the
//! same pair overwrites the previous record. Rehydration rebuilds ephemeral
//! state from the last record when a player reconnects after TTL expiry.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::game::stats::{GameSnapshot, PlayerStats};
use crate::store::repo::PlayerRepository;

/// Save errors.
#[derive(Debug, Error)]
pub enum SaveError {
    /// Filesystem failure.
    #[error("save io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failure.
    #[error("save encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Point-in-time serialization of one playthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSaveRecord {
    pub player_id: String,
    pub save_slot: u32,
    pub stats: PlayerStats,
    pub courses: HashMap<String, f64>,
    pub course_states: HashMap<String, u8>,
    pub achievements: Vec<String>,
    pub semester_index: i64,
    pub game_version: String,
    pub saved_at: DateTime<Utc>,
}

impl GameSaveRecord {
    /// Build a record from an ephemeral snapshot.
    pub fn from_snapshot(player_id: &str, slot: u32, snapshot: &GameSnapshot) -> Self {
        Self {
            player_id: player_id.to_string(),
            save_slot: slot,
            semester_index: snapshot.stats.semester_idx,
            stats: snapshot.stats.clone(),
            courses: snapshot.courses.clone(),
            course_states: snapshot.course_states.clone(),
            achievements: snapshot.achievements.clone(),
            game_version: env!("CARGO_PKG_VERSION").to_string(),
            saved_at: Utc::now(),
        }
    }

    /// Convert back into a snapshot for rehydration.
    pub fn to_snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            stats: self.stats.clone(),
            courses: self.courses.clone(),
            course_states: self.course_states.clone(),
            achievements: self.achievements.clone(),
        }
    }
}

/// File-backed durable store for game saves.
pub struct SaveStore {
    dir: PathBuf,
}

impl SaveStore {
    /// Create a store rooted at a directory (created on first persist).
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn slot_path(&self, player_id: &str, slot: u32) -> PathBuf {
        // Player ids come from token subjects; keep the filename tame.
        let safe: String = player_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}_slot{slot}.json"))
    }

    /// Upsert a record for its (player, slot) pair.
    pub async fn persist(&self, record: &GameSaveRecord) -> Result<(), SaveError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.slot_path(&record.player_id, record.save_slot);
        let encoded = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, encoded).await?;
        info!(player = %record.player_id, slot = record.save_slot, "Game saved");
        Ok(())
    }

    /// Load the record for a (player, slot) pair, if any.
    pub async fn load(&self, player_id: &str, slot: u32) -> Option<GameSaveRecord> {
        let path = self.slot_path(player_id, slot);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                error!(player = %player_id, slot, "Corrupt save discarded: {e}");
                None
            }
        }
    }

    /// Persist the player's current ephemeral snapshot to slot 1.
    /// Returns false (after logging) on failure; a save must never crash a
    /// live session.
    pub async fn persist_from_repo(&self, repo: &PlayerRepository) -> bool {
        let snapshot = repo.snapshot().await;
        if snapshot.stats.username.is_empty() {
            return false;
        }
        let record = GameSaveRecord::from_snapshot(repo.player_id(), 1, &snapshot);
        match self.persist(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!(player = %repo.player_id(), "Persistence failed: {e}");
                false
            }
        }
    }

    /// Rehydrate ephemeral state from the player's slot-1 save.
    /// Returns true when a record was found and written back.
    pub async fn load_into_repo(&self, repo: &PlayerRepository) -> bool {
        match self.load(repo.player_id(), 1).await {
            Some(record) => {
                repo.set_game_data(&record.to_snapshot()).await;
                true
            }
            None => false,
        }
    }
}
