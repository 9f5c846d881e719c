//! Ephemeral Key-Value Store
//!
//! In-process store holding per-player mutable game state: string-keyed
//! entries of hashes, sets, and bounded lists with per-key TTL expiry as a
//! safety net against orphaned state. Every method acquires the store lock
//! exactly once, so each call is atomic with respect to all others, in
//! particular `hash_clamp_incr`, the read-modify-write primitive that the
//! tick loop and action handlers both rely on.
//!
//! Handles are cheap to clone and share one underlying map; the store is safe
//! for concurrent use by every player engine in the process.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The key exists but holds a different value type.
    #[error("key {0} holds a different value type")]
    WrongType(String),
}

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= Instant::now())
    }
}

/// Shared in-process KV store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the entry if its TTL has lapsed, then return a live reference.
    fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        if map.get(key).is_some_and(|e| e.expired()) {
            map.remove(key);
        }
        map.get_mut(key)
    }

    fn hash_entry<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Result<&'a mut HashMap<String, String>, StoreError> {
        if map.get(key).is_some_and(|e| e.expired()) {
            map.remove(key);
        }
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(h) => Ok(h),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Set multiple hash fields.
    pub async fn hash_set_all<I>(&self, key: &str, fields: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = self.inner.lock().await;
        let hash = Self::hash_entry(&mut map, key)?;
        for (field, value) in fields {
            hash.insert(field, value);
        }
        Ok(())
    }

    /// Set one hash field.
    pub async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        self.hash_set_all(key, [(field.to_string(), value)]).await
    }

    /// Get one hash field.
    pub async fn hash_get(&self, key: &str, field: &str) -> Option<String> {
        let mut map = self.inner.lock().await;
        match Self::live(&mut map, key) {
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => h.get(field).cloned(),
            _ => None,
        }
    }

    /// Get all fields of a hash (empty when absent).
    pub async fn hash_get_all(&self, key: &str) -> HashMap<String, String> {
        let mut map = self.inner.lock().await;
        match Self::live(&mut map, key) {
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => h.clone(),
            _ => HashMap::new(),
        }
    }

    /// Atomic integer increment; a missing or non-numeric field counts as 0.
    pub async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut map = self.inner.lock().await;
        let hash = Self::hash_entry(&mut map, key)?;
        let current: i64 = hash
            .get(field)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    /// Atomic float increment; a missing or non-numeric field counts as 0.
    pub async fn hash_incr_by_float(
        &self,
        key: &str,
        field: &str,
        delta: f64,
    ) -> Result<f64, StoreError> {
        let mut map = self.inner.lock().await;
        let hash = Self::hash_entry(&mut map, key)?;
        let current: f64 = hash
            .get(field)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    /// Atomic clamp-and-increment: reads, adds, clamps to [min, max], writes,
    /// and returns the stored value, all under one lock acquisition.
    pub async fn hash_clamp_incr(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        min: i64,
        max: i64,
    ) -> Result<i64, StoreError> {
        let mut map = self.inner.lock().await;
        let hash = Self::hash_entry(&mut map, key)?;
        let current: i64 = hash
            .get(field)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = (current + delta).clamp(min, max);
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    /// Add a member to a set; returns true when newly inserted.
    pub async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = self.inner.lock().await;
        if map.get(key).is_some_and(|e| e.expired()) {
            map.remove(key);
        }
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(s) => Ok(s.insert(member.to_string())),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// All members of a set, sorted (empty when absent).
    pub async fn set_members(&self, key: &str) -> Vec<String> {
        let mut map = self.inner.lock().await;
        match Self::live(&mut map, key) {
            Some(Entry {
                value: Value::Set(s),
                ..
            }) => {
                let mut members: Vec<String> = s.iter().cloned().collect();
                members.sort();
                members
            }
            _ => Vec::new(),
        }
    }

    /// Push a value to the front of a list and trim it to `max_len`,
    /// evicting the oldest entries.
    pub async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
    ) -> Result<(), StoreError> {
        let mut map = self.inner.lock().await;
        if map.get(key).is_some_and(|e| e.expired()) {
            map.remove(key);
        }
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(l) => {
                l.push_front(value.to_string());
                l.truncate(max_len);
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// All list entries, most recent first (empty when absent).
    pub async fn list_range(&self, key: &str) -> Vec<String> {
        let mut map = self.inner.lock().await;
        match Self::live(&mut map, key) {
            Some(Entry {
                value: Value::List(l),
                ..
            }) => l.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Delete keys.
    pub async fn delete(&self, keys: &[String]) {
        let mut map = self.inner.lock().await;
        for key in keys {
            map.remove(key);
        }
    }

    /// Whether a key exists and has not expired.
    pub async fn exists(&self, key: &str) -> bool {
        let mut map = self.inner.lock().await;
        Self::live(&mut map, key).is_some()
    }

    /// Set the TTL on existing keys; absent keys are skipped.
    pub async fn expire(&self, keys: &[String], ttl: Duration) {
        let deadline = Instant::now() + ttl;
        let mut map = self.inner.lock().await;
        for key in keys {
            if let Some(entry) = Self::live(&mut map, key) {
                entry.expires_at = Some(deadline);
            }
        }
    }
}
