//! Player Session Facade
//!
//! The sole reader/writer of one player's ephemeral keys. Normalizes raw
//! values into typed data, batches multi-field writes, refreshes TTLs, and
//! exposes the atomic clamp-update primitive so the tick loop and concurrent
//! action handlers never race on a read-then-write.
//!
//! No operation here raises from a value-parsing failure; malformed legacy
//! data decays to typed defaults.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::game::stats::{unix_now, GameSnapshot, PlayerStats, STAT_MAX, STAT_MIN};
use crate::store::kv::MemoryStore;

/// Bound on the recent-event history list.
pub const EVENT_HISTORY_LIMIT: usize = 10;

/// Facade over one player's ephemeral state.
#[derive(Clone)]
pub struct PlayerRepository {
    store: MemoryStore,
    player_id: String,
    ttl: Duration,
    stats_key: String,
    courses_key: String,
    states_key: String,
    actions_key: String,
    achievements_key: String,
    history_key: String,
    cooldowns_key: String,
}

impl PlayerRepository {
    /// Bind a repository to one player's keys.
    pub fn new(store: MemoryStore, player_id: &str, ttl: Duration) -> Self {
        Self {
            store,
            player_id: player_id.to_string(),
            ttl,
            stats_key: format!("player:{player_id}:stats"),
            courses_key: format!("player:{player_id}:courses"),
            states_key: format!("player:{player_id}:course_states"),
            actions_key: format!("player:{player_id}:actions"),
            achievements_key: format!("player:{player_id}:achievements"),
            history_key: format!("player:{player_id}:event_history"),
            cooldowns_key: format!("player:{player_id}:cooldowns"),
        }
    }

    /// The bound player id.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    fn all_keys(&self) -> Vec<String> {
        vec![
            self.stats_key.clone(),
            self.courses_key.clone(),
            self.states_key.clone(),
            self.actions_key.clone(),
            self.achievements_key.clone(),
            self.history_key.clone(),
            self.cooldowns_key.clone(),
        ]
    }

    /// Whether this player has live ephemeral state.
    pub async fn exists(&self) -> bool {
        self.store.exists(&self.stats_key).await
    }

    /// Batched normalized snapshot of stats, mastery, modes, and achievements.
    pub async fn snapshot(&self) -> GameSnapshot {
        let stats_raw = self.store.hash_get_all(&self.stats_key).await;
        let courses_raw = self.store.hash_get_all(&self.courses_key).await;
        let states_raw = self.store.hash_get_all(&self.states_key).await;
        let achievements = self.store.set_members(&self.achievements_key).await;
        GameSnapshot::from_raw(&stats_raw, &courses_raw, &states_raw, achievements)
    }

    /// Current normalized stats only.
    pub async fn stats(&self) -> PlayerStats {
        let raw = self.store.hash_get_all(&self.stats_key).await;
        PlayerStats::from_raw(&raw)
    }

    /// Raw value of one stat field, when present at all. Lets repair logic
    /// tell "missing" apart from "zero".
    pub async fn raw_stat(&self, field: &str) -> Option<String> {
        self.store.hash_get(&self.stats_key, field).await
    }

    /// Atomic clamp-and-increment on a stat field; returns the stored value.
    pub async fn update_stat_safe(&self, field: &str, delta: i64, min: i64, max: i64) -> i64 {
        match self
            .store
            .hash_clamp_incr(&self.stats_key, field, delta, min, max)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(player = %self.player_id, field, "stat update failed: {e}");
                0
            }
        }
    }

    /// Clamped update with the standard attribute bounds.
    pub async fn update_stat_clamped(&self, field: &str, delta: i64) -> i64 {
        self.update_stat_safe(field, delta, STAT_MIN, STAT_MAX).await
    }

    /// Unclamped integer increment (counters, semester index).
    pub async fn update_stat(&self, field: &str, delta: i64) -> i64 {
        match self.store.hash_incr_by(&self.stats_key, field, delta).await {
            Ok(v) => v,
            Err(e) => {
                warn!(player = %self.player_id, field, "stat increment failed: {e}");
                0
            }
        }
    }

    /// Overwrite raw stat fields.
    pub async fn set_stats_fields(&self, fields: Vec<(String, String)>) {
        if let Err(e) = self.store.hash_set_all(&self.stats_key, fields).await {
            warn!(player = %self.player_id, "stats write failed: {e}");
        }
        self.touch_ttl().await;
    }

    /// Single-course mastery increment, clamped so the applied delta keeps
    /// the value inside [0, 100]. Used by the event path only.
    pub async fn update_course_mastery(&self, course_id: &str, delta: f64) -> f64 {
        let current = self
            .store
            .hash_get(&self.courses_key, course_id)
            .await
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        let applied = (current + delta).clamp(0.0, 100.0) - current;
        match self
            .store
            .hash_incr_by_float(&self.courses_key, course_id, applied)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(player = %self.player_id, course_id, "mastery update failed: {e}");
                current
            }
        }
    }

    /// Batched per-course mastery increments from the tick loop. Unclamped;
    /// the display side caps what it shows.
    pub async fn batch_update_course_mastery(&self, updates: &HashMap<String, f64>) {
        for (course_id, delta) in updates {
            if let Err(e) = self
                .store
                .hash_incr_by_float(&self.courses_key, course_id, *delta)
                .await
            {
                warn!(player = %self.player_id, course_id, "mastery batch failed: {e}");
            }
        }
    }

    /// Set one course's effort mode.
    pub async fn set_course_state(&self, course_id: &str, mode: u8) {
        if let Err(e) = self
            .store
            .hash_set(&self.states_key, course_id, mode.to_string())
            .await
        {
            warn!(player = %self.player_id, course_id, "course state write failed: {e}");
        }
    }

    /// All course effort modes, normalized.
    pub async fn course_states(&self) -> HashMap<String, u8> {
        self.store
            .hash_get_all(&self.states_key)
            .await
            .into_iter()
            .map(|(k, v)| (k, v.parse::<u8>().ok().filter(|m| *m <= 2).unwrap_or(1)))
            .collect()
    }

    /// All course mastery values, normalized.
    pub async fn course_mastery(&self) -> HashMap<String, f64> {
        self.store
            .hash_get_all(&self.courses_key)
            .await
            .into_iter()
            .map(|(k, v)| (k, v.parse().unwrap_or(0.0)))
            .collect()
    }

    /// Count an action kind for achievement predicates.
    pub async fn increment_action_count(&self, kind: &str) -> i64 {
        match self.store.hash_incr_by(&self.actions_key, kind, 1).await {
            Ok(v) => v,
            Err(e) => {
                warn!(player = %self.player_id, kind, "action count failed: {e}");
                0
            }
        }
    }

    /// All action counters.
    pub async fn action_counts(&self) -> HashMap<String, i64> {
        self.store
            .hash_get_all(&self.actions_key)
            .await
            .into_iter()
            .map(|(k, v)| (k, v.parse().unwrap_or(0)))
            .collect()
    }

    /// Unlock an achievement; returns true when newly unlocked.
    pub async fn unlock_achievement(&self, code: &str) -> bool {
        match self.store.set_add(&self.achievements_key, code).await {
            Ok(new) => new,
            Err(e) => {
                warn!(player = %self.player_id, code, "achievement write failed: {e}");
                false
            }
        }
    }

    /// All unlocked achievement codes.
    pub async fn achievements(&self) -> Vec<String> {
        self.store.set_members(&self.achievements_key).await
    }

    /// Remaining cooldown for a relax target; zero means usable.
    pub async fn check_cooldown(&self, kind: &str, cooldown: Duration) -> Duration {
        let last_use = self
            .store
            .hash_get(&self.cooldowns_key, kind)
            .await
            .and_then(|v| v.parse::<i64>().ok());
        match last_use {
            Some(stamp) => {
                let elapsed = (unix_now() - stamp).max(0) as u64;
                Duration::from_secs(cooldown.as_secs().saturating_sub(elapsed))
            }
            None => Duration::ZERO,
        }
    }

    /// Stamp a relax target's last-use time.
    pub async fn set_cooldown(&self, kind: &str) {
        if let Err(e) = self
            .store
            .hash_set(&self.cooldowns_key, kind, unix_now().to_string())
            .await
        {
            warn!(player = %self.player_id, kind, "cooldown write failed: {e}");
        }
    }

    /// Record an event title, keeping the most recent ten.
    pub async fn add_event_to_history(&self, title: &str) {
        if let Err(e) = self
            .store
            .list_push_trim(&self.history_key, title, EVENT_HISTORY_LIMIT)
            .await
        {
            warn!(player = %self.player_id, "event history write failed: {e}");
        }
    }

    /// Recent event titles, most recent first.
    pub async fn event_history(&self) -> Vec<String> {
        self.store.list_range(&self.history_key).await
    }

    /// Advance the semester index, returning the new value.
    pub async fn increment_semester(&self) -> i64 {
        self.update_stat("semester_idx", 1).await
    }

    /// Write fresh-playthrough state, clearing anything that existed.
    pub async fn init_game(&self, stats: &PlayerStats) {
        self.store.delete(&self.all_keys()).await;
        if let Err(e) = self
            .store
            .hash_set_all(&self.stats_key, stats.to_field_map())
            .await
        {
            warn!(player = %self.player_id, "init write failed: {e}");
        }
        self.touch_ttl().await;
    }

    /// Replace the semester's course set: update stats fields, reset mastery
    /// and modes, refresh TTL. Achievements, counters, and history survive.
    pub async fn update_courses_and_states(
        &self,
        stats_update: Vec<(String, String)>,
        courses: &HashMap<String, f64>,
        states: &HashMap<String, u8>,
    ) {
        if !stats_update.is_empty() {
            if let Err(e) = self.store.hash_set_all(&self.stats_key, stats_update).await {
                warn!(player = %self.player_id, "stats update failed: {e}");
            }
        }
        self.store
            .delete(&[self.courses_key.clone(), self.states_key.clone()])
            .await;
        if !courses.is_empty() {
            let mastery = courses
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect::<Vec<_>>();
            if let Err(e) = self.store.hash_set_all(&self.courses_key, mastery).await {
                warn!(player = %self.player_id, "mastery init failed: {e}");
            }
        }
        if !states.is_empty() {
            let modes = states
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect::<Vec<_>>();
            if let Err(e) = self.store.hash_set_all(&self.states_key, modes).await {
                warn!(player = %self.player_id, "mode init failed: {e}");
            }
        }
        self.touch_ttl().await;
    }

    /// Full rehydration write from a durable snapshot.
    pub async fn set_game_data(&self, snapshot: &GameSnapshot) {
        self.store.delete(&self.all_keys()).await;
        if let Err(e) = self
            .store
            .hash_set_all(&self.stats_key, snapshot.stats.to_field_map())
            .await
        {
            warn!(player = %self.player_id, "rehydrate stats failed: {e}");
        }
        let mastery = snapshot
            .courses
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect::<Vec<_>>();
        if !mastery.is_empty() {
            let _ = self.store.hash_set_all(&self.courses_key, mastery).await;
        }
        let modes = snapshot
            .course_states
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect::<Vec<_>>();
        if !modes.is_empty() {
            let _ = self.store.hash_set_all(&self.states_key, modes).await;
        }
        for code in &snapshot.achievements {
            let _ = self.store.set_add(&self.achievements_key, code).await;
        }
        self.touch_ttl().await;
    }

    /// Refresh expiry on all of this player's keys.
    pub async fn touch_ttl(&self) {
        self.store.expire(&self.all_keys(), self.ttl).await;
    }

    /// Remove all of this player's ephemeral keys.
    pub async fn delete_all(&self) {
        self.store.delete(&self.all_keys()).await;
    }
}
