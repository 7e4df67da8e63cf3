//! # stepwise-engine: Versioned SQL Migrations
//!
//! Applies numbered up/down SQL scripts to a PostgreSQL schema, one step at a
//! time, while keeping a single `{version, dirty}` record per namespace.
//!
//! The engine is assembled from three collaborators:
//! - a [`MigrationSource`] listing and reading migration files,
//! - a [`VersionStore`] persisting the record and guarding the namespace lock,
//! - an [`ExecutionDriver`] running one step's script.
//!
//! PostgreSQL implementations live in [`postgres`]; in-memory ones are
//! exported for tests and embedding.

pub mod definitions;
pub mod error;
pub mod source;
pub mod store;
pub mod driver;
pub mod plan;
pub mod runner;
pub mod postgres;

// Re-export the types callers work with
pub use definitions::*;
pub use error::*;
pub use source::{DirectorySource, MemorySource, MigrationIndex, MigrationSource, SourceReader, VersionEntry};
pub use source::directory::{CreatedMigration, VersionScheme};
pub use store::{MemoryBackend, MemoryVersionStore, VersionStore};
pub use driver::{ExecutedStep, ExecutionDriver, RecordingDriver};
pub use plan::{Plan, PlannedStep};
pub use runner::{EngineState, MigrationRunner};
pub use postgres::{PgDriver, PgSession, PgVersionStore};
