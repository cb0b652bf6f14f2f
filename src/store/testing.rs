//! Store double whose availability can be toggled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{MemoryStore, ResilienceStore, StoreError, WindowHit};

/// Wraps a [`MemoryStore`]; while down, every call fails as unavailable.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    failed_calls: AtomicU32,
}

impl FlakyStore {
    pub fn up() -> Self {
        Self::default()
    }

    pub fn down() -> Self {
        let store = Self::default();
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Calls rejected while down.
    pub fn failed_calls(&self) -> u32 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResilienceStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        self.inner.hash_get_all(key).await
    }

    async fn hash_set_ex(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.hash_set_ex(key, fields, ttl).await
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
        self.check()?;
        self.inner.window_hit(key, now, window, limit, member, ttl).await
    }

    async fn window_count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.window_count(key, now, window).await
    }
}
