//! Version Store - durable record of the applied version and dirty flag,
//! plus the namespace-scoped lock that keeps concurrent runs apart.

pub mod memory;

use async_trait::async_trait;

use crate::definitions::SchemaState;
use crate::error::StoreResult;

pub use memory::{MemoryBackend, MemoryVersionStore};

/// Persisted `{version, dirty}` record for one namespace.
///
/// Implementations must make `write` atomic: a reader never observes a
/// partially written record. `lock` never blocks; it fails with
/// [`StoreError::AlreadyLocked`](crate::error::StoreError::AlreadyLocked)
/// when another holder has the namespace.
#[async_trait]
pub trait VersionStore: Send {
    /// Namespace this store is scoped to
    fn namespace(&self) -> &str;

    /// Acquire the exclusive namespace lock
    async fn lock(&mut self) -> StoreResult<()>;

    /// Release the namespace lock. Releasing a lock that is not held is a no-op.
    async fn unlock(&mut self) -> StoreResult<()>;

    /// Current state; [`SchemaState::none`] when no record exists yet
    async fn read(&mut self) -> StoreResult<SchemaState>;

    /// Atomically replace the stored state
    async fn write(&mut self, state: SchemaState) -> StoreResult<()>;
}
