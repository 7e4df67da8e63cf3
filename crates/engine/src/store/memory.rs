//! In-memory version store.
//!
//! A [`MemoryBackend`] plays the role of the database: every
//! [`MemoryVersionStore`] handed out by the same backend sees the same records
//! and competes for the same namespace locks, so two stores behave like two
//! processes pointed at one database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::VersionStore;
use crate::definitions::SchemaState;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct Namespace {
    record: Option<SchemaState>,
    lock_holder: Option<Uuid>,
    writes: usize,
}

#[derive(Debug, Default)]
struct Shared {
    namespaces: HashMap<String, Namespace>,
    unavailable: bool,
}

/// Shared storage behind any number of [`MemoryVersionStore`]s
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store handle for `namespace` with its own lock identity
    pub fn store(&self, namespace: impl Into<String>) -> MemoryVersionStore {
        MemoryVersionStore {
            backend: self.clone(),
            namespace: namespace.into(),
            holder: Uuid::new_v4(),
        }
    }

    /// The record as stored, `None` when never written
    pub fn record(&self, namespace: &str) -> Option<SchemaState> {
        self.shared()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.record)
    }

    /// Number of successful writes, to observe that a run left state untouched
    pub fn write_count(&self, namespace: &str) -> usize {
        self.shared()
            .namespaces
            .get(namespace)
            .map(|ns| ns.writes)
            .unwrap_or(0)
    }

    pub fn is_locked(&self, namespace: &str) -> bool {
        self.shared()
            .namespaces
            .get(namespace)
            .map(|ns| ns.lock_holder.is_some())
            .unwrap_or(false)
    }

    /// Seed a record directly, bypassing locks
    pub fn seed(&self, namespace: &str, state: SchemaState) {
        self.shared()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .record = Some(state);
    }

    /// Simulate the backing medium going away
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared().unavailable = unavailable;
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        // a panic while holding the guard cannot leave a torn record: every
        // mutation is a single assignment
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// [`VersionStore`] over a [`MemoryBackend`]
#[derive(Debug, Clone)]
pub struct MemoryVersionStore {
    backend: MemoryBackend,
    namespace: String,
    holder: Uuid,
}

impl MemoryVersionStore {
    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    fn guard(&self) -> StoreResult<MutexGuard<'_, Shared>> {
        let shared = self.backend.shared();
        if shared.unavailable {
            return Err(StoreError::unavailable(format!(
                "memory backend for namespace '{}' is offline",
                self.namespace
            )));
        }
        Ok(shared)
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn lock(&mut self) -> StoreResult<()> {
        let mut shared = self.guard()?;
        let ns = shared.namespaces.entry(self.namespace.clone()).or_default();
        match ns.lock_holder {
            Some(holder) if holder != self.holder => Err(StoreError::AlreadyLocked {
                namespace: self.namespace.clone(),
            }),
            _ => {
                ns.lock_holder = Some(self.holder);
                Ok(())
            }
        }
    }

    async fn unlock(&mut self) -> StoreResult<()> {
        let mut shared = self.guard()?;
        if let Some(ns) = shared.namespaces.get_mut(&self.namespace) {
            if ns.lock_holder == Some(self.holder) {
                ns.lock_holder = None;
            }
        }
        Ok(())
    }

    async fn read(&mut self) -> StoreResult<SchemaState> {
        let shared = self.guard()?;
        Ok(shared
            .namespaces
            .get(&self.namespace)
            .and_then(|ns| ns.record)
            .unwrap_or_default())
    }

    async fn write(&mut self, state: SchemaState) -> StoreResult<()> {
        let mut shared = self.guard()?;
        let ns = shared.namespaces.entry(self.namespace.clone()).or_default();
        if let Some(holder) = ns.lock_holder {
            if holder != self.holder {
                return Err(StoreError::AlreadyLocked {
                    namespace: self.namespace.clone(),
                });
            }
        }
        ns.record = Some(state);
        ns.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_defaults_to_none() {
        let backend = MemoryBackend::new();
        let mut store = backend.store("public");

        assert_eq!(store.read().await.unwrap(), SchemaState::none());
        assert_eq!(backend.record("public"), None);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_per_namespace() {
        let backend = MemoryBackend::new();
        let mut first = backend.store("billing");
        let mut second = backend.store("billing");
        let mut other = backend.store("inventory");

        first.lock().await.unwrap();
        assert!(matches!(
            second.lock().await,
            Err(StoreError::AlreadyLocked { .. })
        ));
        other.lock().await.unwrap();

        // a stranger cannot release someone else's lock
        second.unlock().await.unwrap();
        assert!(backend.is_locked("billing"));

        first.unlock().await.unwrap();
        second.lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_blocked_while_locked_elsewhere() {
        let backend = MemoryBackend::new();
        let mut holder = backend.store("public");
        let mut intruder = backend.store("public");

        holder.lock().await.unwrap();
        assert!(intruder.write(SchemaState::clean(1)).await.is_err());

        holder.write(SchemaState::dirty(4)).await.unwrap();
        assert_eq!(intruder.read().await.unwrap(), SchemaState::dirty(4));
        assert_eq!(backend.write_count("public"), 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let backend = MemoryBackend::new();
        let mut store = backend.store("public");
        backend.set_unavailable(true);

        assert!(matches!(
            store.read().await,
            Err(StoreError::Unavailable { .. })
        ));
    }
}
