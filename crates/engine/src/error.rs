//! Error types for the migration engine
//!
//! `SourceError` covers everything that can go wrong while reading and
//! validating the migration collection; it is always raised before any script
//! runs. `StoreError` and `DriverError` are what the collaborators report, and
//! the engine folds all of them into `MigrateError`.

use std::path::PathBuf;
use thiserror::Error;

use crate::definitions::{MigrationDirection, Version};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type alias for version store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for engine operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Malformed or inconsistent migration source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Migrations directory not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read migration source '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid migration filename '{file}': {reason}")]
    InvalidFilename { file: String, reason: String },

    #[error("Invalid migration version '{raw}' in '{file}': expected a positive integer")]
    InvalidVersion { file: String, raw: String },

    #[error("Duplicate {direction} migration for version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: Version,
        direction: MigrationDirection,
        first: String,
        second: String,
    },

    #[error("No {direction} script for migration version {version}")]
    MissingScript {
        version: Version,
        direction: MigrationDirection,
    },

    #[error("Version {version} does not exist in the migration source")]
    UnknownVersion { version: Version },
}

/// Failure reported by a version store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version store unavailable: {message}")]
    Unavailable {
        message: String,
        source: Option<BoxError>,
    },

    #[error("Namespace '{namespace}' is locked by another migration")]
    AlreadyLocked { namespace: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Failure reported by an execution driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("{message}")]
    Rejected { message: String },
}

/// Error type for migration engine runs
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Version store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        source: Option<BoxError>,
    },

    #[error("Another migration is in progress for namespace '{namespace}'")]
    AlreadyLocked { namespace: String },

    /// `version` is `None` when the record is dirty without a version
    #[error(
        "Database is dirty at version {}. Fix the schema manually, then run `force {}`",
        version_label(.version),
        force_argument(.version)
    )]
    DirtyDatabase { version: Option<Version> },

    #[error("Migration {version} ({direction}) failed: {source}")]
    Execution {
        version: Version,
        direction: MigrationDirection,
        #[source]
        source: DriverError,
    },
}

impl MigrateError {
    /// The version left dirty, for errors that leave or find a dirty record
    pub fn dirty_version(&self) -> Option<Version> {
        match self {
            MigrateError::DirtyDatabase { version } => *version,
            MigrateError::Execution { version, .. } => Some(*version),
            _ => None,
        }
    }
}

fn version_label(version: &Option<Version>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "(none)".to_string(),
    }
}

/// `force -1` clears the record
fn force_argument(version: &Option<Version>) -> Version {
    version.unwrap_or(-1)
}

impl From<StoreError> for MigrateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyLocked { namespace } => MigrateError::AlreadyLocked { namespace },
            StoreError::Unavailable { message, source } => {
                MigrateError::StoreUnavailable { message, source }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_store_error_conversion() {
        let err: MigrateError = StoreError::AlreadyLocked {
            namespace: "billing".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Another migration is in progress for namespace 'billing'"
        );

        let err: MigrateError = StoreError::with_source(
            "read failed",
            std::io::Error::new(std::io::ErrorKind::Other, "connection reset"),
        )
        .into();
        assert!(matches!(err, MigrateError::StoreUnavailable { .. }));
        assert_eq!(err.source().unwrap().to_string(), "connection reset");
    }

    #[test]
    fn test_dirty_version() {
        let err = MigrateError::DirtyDatabase { version: Some(2) };
        assert_eq!(err.dirty_version(), Some(2));
        assert!(err.to_string().contains("force 2"));

        let err = MigrateError::DirtyDatabase { version: None };
        assert_eq!(err.dirty_version(), None);
        assert!(err.to_string().contains("at version (none)"));
        assert!(err.to_string().contains("force -1"));

        let err = MigrateError::Execution {
            version: 5,
            direction: MigrationDirection::Up,
            source: DriverError::Rejected {
                message: "syntax error".to_string(),
            },
        };
        assert_eq!(err.dirty_version(), Some(5));
        assert_eq!(err.to_string(), "Migration 5 (up) failed: syntax error");

        let err: MigrateError = SourceError::UnknownVersion { version: 9 }.into();
        assert_eq!(err.dirty_version(), None);
    }
}
