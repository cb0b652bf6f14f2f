//! In-process store backed by `DashMap`.
//!
//! Each key lives in one shard entry, so holding the entry guard makes the
//! window sequence atomic with respect to every other caller. Reads treat
//! stale entries as absent; every [`SWEEP_EVERY`] writes the whole map is
//! swept so keys that are never touched again are still reclaimed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{ResilienceStore, StoreError, WindowHit};

/// Writes between two sweeps of expired keys.
pub const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
    /// Sorted by score ascending.
    Window(Vec<(f64, String)>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Single-process implementation of [`ResilienceStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|slot| !slot.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            tracing::debug!(removed = removed, remaining = self.slots.len(), "Swept expired store keys");
        }
        removed
    }

    /// Count a write and sweep when due. Must not run while holding a slot guard.
    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            self.purge_expired();
        }
    }

    fn wrong_type(key: &str, expected: &str) -> StoreError {
        StoreError::Malformed {
            key: key.to_string(),
            reason: format!("expected {}", expected),
        }
    }
}

fn prune(entries: &mut Vec<(f64, String)>, cutoff: f64) {
    entries.retain(|(score, _)| *score > cutoff);
}

#[async_trait]
impl ResilienceStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => match &slot.value {
                Value::Text(text) => Ok(Some(text.clone())),
                _ => Err(Self::wrong_type(key, "string")),
            },
            _ => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.note_write();
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(key);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now = Instant::now();
        match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => match &slot.value {
                Value::Hash(fields) => Ok(fields.clone()),
                _ => Err(Self::wrong_type(key, "hash")),
            },
            _ => Ok(HashMap::new()),
        }
    }

    async fn hash_set_ex(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.note_write();
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        if slot.is_expired(now) {
            slot.value = Value::Hash(HashMap::new());
        }
        match &mut slot.value {
            Value::Hash(existing) => {
                for (field, value) in fields {
                    existing.insert(field.clone(), value.clone());
                }
            }
            _ => return Err(Self::wrong_type(key, "hash")),
        }
        slot.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn window_hit(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        limit: u64,
        member: &str,
        ttl: Duration,
    ) -> Result<WindowHit, StoreError> {
        self.note_write();
        let instant = Instant::now();
        let cutoff = now - window.as_secs_f64();

        let mut slot = match self.slots.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => {
                let mut slot = occupied.into_ref();
                if slot.is_expired(instant) {
                    slot.value = Value::Window(Vec::new());
                }
                slot
            }
            MapEntry::Vacant(vacant) => vacant.insert(Slot {
                value: Value::Window(Vec::new()),
                expires_at: None,
            }),
        };

        let entries = match &mut slot.value {
            Value::Window(entries) => entries,
            _ => return Err(Self::wrong_type(key, "sorted set")),
        };

        prune(entries, cutoff);
        let count = entries.len() as u64;
        let admitted = count < limit;
        if admitted {
            let at = entries.partition_point(|(score, _)| *score <= now);
            entries.insert(at, (now, member.to_string()));
        }
        let oldest = entries.first().map(|(score, _)| *score);
        slot.expires_at = Some(instant + ttl);

        Ok(WindowHit {
            count,
            admitted,
            oldest,
        })
    }

    async fn window_count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StoreError> {
        let instant = Instant::now();
        let cutoff = now - window.as_secs_f64();
        match self.slots.get_mut(key) {
            Some(mut slot) if !slot.is_expired(instant) => match &mut slot.value {
                Value::Window(entries) => {
                    prune(entries, cutoff);
                    Ok(entries.len() as u64)
                }
                _ => Err(Self::wrong_type(key, "sorted set")),
            },
            _ => Ok(0),
        }
    }
}
