use crate::domain::ports::CoordinationStore;
use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

/// In-process coordination store for tests and single-process dry-runs.
///
/// Atomicity comes from holding the map mutex across each whole operation,
/// which mirrors the single-threaded execution of the real store's commands.
#[derive(Clone, Default)]
pub struct InMemoryCoordinationStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    published: Arc<Mutex<Vec<(String, String)>>>,
    /// Test hook: flip to simulate an unreachable store.
    fail: Arc<AtomicBool>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate coordination-store unavailability for failure-path tests.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Messages published so far, for test assertions.
    pub fn published_messages(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("coordination store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let current = entries.get(key).filter(|e| e.live()).map(|e| e.value.as_str());
        if current != expected {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        let next = match entries.get(key).filter(|e| e.live()) {
            Some(entry) => entry.value.parse::<i64>().unwrap_or(0) + 1,
            None => 1,
        };
        let expires_at = if next == 1 {
            Some(Instant::now() + ttl)
        } else {
            entries.get(key).and_then(|e| e.expires_at)
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.check_available()?;
        self.published
            .lock()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}
