//! Migration Definitions - Core types shared by the source reader, the
//! version store, the execution driver and the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Migration version number. Always positive for migrations in a source.
pub type Version = i64;

/// Default name of the version tracking table
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
}

impl MigrationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "up",
            MigrationDirection::Down => "down",
        }
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One directional change, loaded from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub version: Version,
    /// Human-readable name, not semantically significant
    pub name: String,
    pub direction: MigrationDirection,
    /// SQL text to execute
    pub script: String,
}

/// Persisted migration state of one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaState {
    /// `None` when no migration has been applied yet
    pub version: Option<Version>,
    /// The last state-changing operation did not complete cleanly
    pub dirty: bool,
}

impl SchemaState {
    /// Nothing applied yet
    pub fn none() -> Self {
        Self::default()
    }

    pub fn clean(version: Version) -> Self {
        Self {
            version: Some(version),
            dirty: false,
        }
    }

    pub fn dirty(version: Version) -> Self {
        Self {
            version: Some(version),
            dirty: true,
        }
    }

    pub fn is_none(&self) -> bool {
        self.version.is_none()
    }
}

impl fmt::Display for SchemaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.version, self.dirty) {
            (None, false) => f.write_str("(no migrations applied)"),
            (None, true) => f.write_str("(no migrations applied) (dirty)"),
            (Some(version), false) => write!(f, "{}", version),
            (Some(version), true) => write!(f, "{} (dirty)", version),
        }
    }
}

/// How far an `Up` or `Down` command goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every pending (up) or applied (down) migration
    All,
    /// At most this many steps
    Steps(usize),
}

/// A command handed to the migration engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCommand {
    Up(Target),
    Down(Target),
    /// Migrate up or down until the recorded version equals the given one;
    /// `None` rolls everything back
    Goto(Option<Version>),
    /// Rewrite the recorded state to `{version, dirty: false}` without
    /// running any script
    Force(Option<Version>),
}

impl fmt::Display for MigrationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationCommand::Up(Target::All) => f.write_str("up"),
            MigrationCommand::Up(Target::Steps(n)) => write!(f, "up {}", n),
            MigrationCommand::Down(Target::All) => f.write_str("down"),
            MigrationCommand::Down(Target::Steps(n)) => write!(f, "down {}", n),
            MigrationCommand::Goto(Some(v)) => write!(f, "goto {}", v),
            MigrationCommand::Goto(None) => f.write_str("goto none"),
            MigrationCommand::Force(Some(v)) => write!(f, "force {}", v),
            MigrationCommand::Force(None) => f.write_str("force none"),
        }
    }
}

/// Whether each step's script is wrapped in its own transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPolicy {
    /// One transaction per step: a failing statement rolls back the whole step
    #[default]
    PerStep,
    /// Execute the script as-is, for statements PostgreSQL refuses to run
    /// inside a transaction block (e.g. `CREATE INDEX CONCURRENTLY`)
    Disabled,
}

/// Configuration for the migration engine and its version store
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Namespace (schema) the state and the scripts belong to
    pub namespace: String,
    /// Table name for tracking the applied version
    pub migrations_table: String,
    pub transaction_policy: TransactionPolicy,
}

impl MigratorConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    pub fn with_transaction_policy(mut self, policy: TransactionPolicy) -> Self {
        self.transaction_policy = policy;
        self
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            namespace: "public".to_string(),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            transaction_policy: TransactionPolicy::default(),
        }
    }
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Steps were executed. `partial` is set when a bounded request asked for
    /// more steps than remained.
    Applied { steps: usize, partial: bool },
    /// Nothing to do
    NoChange,
    /// State rewritten by `force`, no script ran
    Forced,
}

/// One step executed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedStep {
    pub version: Version,
    pub name: String,
    pub direction: MigrationDirection,
    pub duration_ms: u128,
}

/// Result of a successful engine run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub outcome: Outcome,
    /// State recorded when the run finished
    pub state: SchemaState,
    pub applied: Vec<AppliedStep>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationReport {
    pub fn is_no_change(&self) -> bool {
        matches!(self.outcome, Outcome::NoChange)
    }

    pub fn steps(&self) -> usize {
        self.applied.len()
    }

    /// Direction the run moved the schema in, `None` when no step ran
    pub fn direction(&self) -> Option<MigrationDirection> {
        self.applied.first().map(|step| step.direction)
    }
}

/// Status of one source version against the recorded state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: Version,
    pub name: String,
    pub applied: bool,
    /// This is the recorded version and the record is dirty
    pub dirty: bool,
    pub reversible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_state_display() {
        assert_eq!(SchemaState::none().to_string(), "(no migrations applied)");
        assert_eq!(SchemaState::clean(3).to_string(), "3");
        assert_eq!(SchemaState::dirty(2).to_string(), "2 (dirty)");
        assert_eq!(SchemaState::clean(0).to_string(), "0");
    }

    #[test]
    fn test_command_display() {
        assert_eq!(MigrationCommand::Up(Target::All).to_string(), "up");
        assert_eq!(MigrationCommand::Down(Target::Steps(2)).to_string(), "down 2");
        assert_eq!(MigrationCommand::Force(None).to_string(), "force none");
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(Outcome::Applied { steps: 2, partial: false }).unwrap();
        assert_eq!(json["kind"], "applied");
        assert_eq!(json["steps"], 2);
    }
}
