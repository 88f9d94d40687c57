//! services/run_locks.rs
//! Exclusión mutua por run en memoria. El scheduler usa `try_lock` (si el run
//! está ocupado se salta); las operaciones externas esperan con `lock`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type RunGuard = OwnedMutexGuard<()>;

#[derive(Clone, Default)]
pub struct RunLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        RunLocks::default()
    }

    fn entry(&self, run_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(run_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn try_lock(&self, run_id: &str) -> Option<RunGuard> {
        self.entry(run_id).try_lock_owned().ok()
    }

    pub async fn lock(&self, run_id: &str) -> RunGuard {
        self.entry(run_id).lock_owned().await
    }

    /// Elimina entradas que nadie tiene tomadas ni esperando.
    pub fn prune(&self) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
