//! In-memory implementations of the coordination traits.
//!
//! Always compiled (not `cfg(test)`) so integration tests in dependent
//! crates can drive the full dispatcher/gateway path without a Redis
//! server. Semantics match the Redis implementations: conditional create,
//! atomic merge, CAS transition, named mutual exclusion, best-effort
//! broadcast delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tracing::warn;

use scrollcap_core::{
    defaults, Error, HeldLock, JobId, JobPatch, JobRecord, JobStatus, JobStore, LockManager,
    LockName, Notifier, Result, Subscription,
};

/// In-memory [`JobStore`] over a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemoryJobStore {
    docs: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: &JobId, url: &str) -> Result<bool> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(id.clone(), JobRecord::started(url));
        Ok(true)
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn merge(&self, id: &JobId, patch: JobPatch) -> Result<()> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        doc.apply(&patch);
        Ok(())
    }

    async fn try_transition(
        &self,
        id: &JobId,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<bool> {
        let mut docs = self.docs.write().await;
        let Some(doc) = docs.get_mut(id) else {
            return Ok(false);
        };
        if doc.status != from {
            return Ok(false);
        }
        doc.apply(&patch);
        doc.status = to;
        Ok(true)
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        Ok(self.docs.write().await.remove(id).is_some())
    }

    async fn clear(&self) -> Result<u64> {
        let mut docs = self.docs.write().await;
        let count = docs.len() as u64;
        docs.clear();
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory [`LockManager`]: one tokio mutex per lock name, with the same
/// bounded acquire deadline as the Redis implementation.
pub struct MemoryLockManager {
    locks: HashMap<LockName, Arc<Mutex<()>>>,
    acquire_timeout: Duration,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(defaults::LOCK_ACQUIRE_TIMEOUT_MS))
    }

    pub fn with_timeout(acquire_timeout: Duration) -> Self {
        let mut locks = HashMap::new();
        locks.insert(LockName::NewTask, Arc::new(Mutex::new(())));
        locks.insert(LockName::VideosJson, Arc::new(Mutex::new(())));
        Self {
            locks,
            acquire_timeout,
        }
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(&self, name: LockName) -> Result<Box<dyn HeldLock>> {
        let mutex = self.locks[&name].clone();
        match tokio::time::timeout(self.acquire_timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(Box::new(MemoryHeldLock {
                _guard: guard,
            })),
            Err(_) => Err(Error::LockTimeout {
                name: name.as_str(),
                waited_ms: self.acquire_timeout.as_millis() as u64,
            }),
        }
    }
}

struct MemoryHeldLock {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait::async_trait]
impl HeldLock for MemoryHeldLock {
    async fn release(self: Box<Self>) -> Result<()> {
        // guard drops here
        Ok(())
    }
}

/// In-memory notification channel over a tokio broadcast channel.
#[derive(Clone)]
pub struct MemoryChannel {
    tx: broadcast::Sender<JobId>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> MemorySubscription {
        MemorySubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryChannel {
    async fn publish(&self, id: &JobId) -> Result<()> {
        // no subscribers yet is fine — delivery is best-effort
        let _ = self.tx.send(id.clone());
        Ok(())
    }
}

pub struct MemorySubscription {
    rx: broadcast::Receiver<JobId>,
}

#[async_trait::async_trait]
impl Subscription for MemorySubscription {
    async fn next_id(&mut self) -> Result<Option<JobId>> {
        loop {
            match self.rx.recv().await {
                Ok(id) => return Ok(Some(id)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
