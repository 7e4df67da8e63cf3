//! Migration Runner - plans and executes commands against a version store.
//!
//! A run moves through `Idle → Planning → Applying → Done`, or ends in
//! `Dirty` when the recorded state is (or becomes) inconsistent. Before a
//! step's script runs, the store records `{step version, dirty}`; once the
//! script commits, the store records the step's resulting version as clean.
//! A crash at any point therefore leaves either a clean record of the last
//! committed step or a dirty record naming the step that was in flight.

use std::time::Instant;
use tracing::Instrument;

use crate::definitions::{
    AppliedStep, MigrationCommand, MigrationReport, MigrationStatus, MigratorConfig, Outcome,
    SchemaState, Target, Version,
};
use crate::driver::ExecutionDriver;
use crate::error::{MigrateError, MigrateResult};
use crate::plan::Plan;
use crate::source::{MigrationSource, SourceReader};
use crate::store::VersionStore;

/// Where the runner is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Planning,
    Applying { version: Version },
    /// The record is dirty; `None` when it carries no version
    Dirty { version: Option<Version> },
    Done { state: SchemaState },
}

/// Migration runner that executes migrations against a database
pub struct MigrationRunner<S, V, D> {
    reader: SourceReader<S>,
    store: V,
    driver: D,
    config: MigratorConfig,
    state: EngineState,
}

impl<S, V, D> MigrationRunner<S, V, D>
where
    S: MigrationSource,
    V: VersionStore,
    D: ExecutionDriver,
{
    /// Create a runner from its collaborators. The source is listed and
    /// validated here, before any database work.
    pub fn new(source: S, store: V, driver: D, config: &MigratorConfig) -> MigrateResult<Self> {
        Ok(Self {
            reader: SourceReader::open(source)?,
            store,
            driver,
            config: config.clone(),
            state: EngineState::Idle,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn reader(&self) -> &SourceReader<S> {
        &self.reader
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, V, D) {
        let Self {
            reader,
            store,
            driver,
            ..
        } = self;
        (reader.into_source(), store, driver)
    }

    /// Apply all (or `Target::Steps(n)`) pending migrations
    pub async fn up(&mut self, target: Target) -> MigrateResult<MigrationReport> {
        self.run(MigrationCommand::Up(target)).await
    }

    /// Roll back all (or `Target::Steps(n)`) applied migrations
    pub async fn down(&mut self, target: Target) -> MigrateResult<MigrationReport> {
        self.run(MigrationCommand::Down(target)).await
    }

    /// Migrate up or down to `version`; `None` rolls everything back
    pub async fn goto(&mut self, version: Option<Version>) -> MigrateResult<MigrationReport> {
        self.run(MigrationCommand::Goto(version)).await
    }

    /// Record `{version, dirty: false}` without running any script
    pub async fn force(&mut self, version: Option<Version>) -> MigrateResult<MigrationReport> {
        self.run(MigrationCommand::Force(version)).await
    }

    /// Recorded state. Takes no lock.
    pub async fn version(&mut self) -> MigrateResult<SchemaState> {
        Ok(self.store.read().await?)
    }

    /// Every source version with its applied/pending status. Takes no lock.
    pub async fn status(&mut self) -> MigrateResult<Vec<MigrationStatus>> {
        let current = self.store.read().await?;
        Ok(self
            .reader
            .index()
            .list()
            .map(|entry| {
                let applied = current.version.is_some_and(|v| entry.version <= v);
                MigrationStatus {
                    version: entry.version,
                    name: entry.name.clone(),
                    applied,
                    dirty: current.dirty && current.version == Some(entry.version),
                    reversible: entry.is_reversible(),
                }
            })
            .collect())
    }

    /// Execute one command under the namespace lock.
    ///
    /// The lock is released on every path once it was acquired. A run that
    /// cannot take the lock fails with `AlreadyLocked` without reading or
    /// writing any state.
    pub async fn run(&mut self, command: MigrationCommand) -> MigrateResult<MigrationReport> {
        let span = tracing::info_span!(
            "migrate",
            namespace = %self.config.namespace,
            command = %command
        );

        async {
            self.state = EngineState::Planning;
            if let Err(e) = self.store.lock().await {
                self.state = EngineState::Idle;
                return Err(MigrateError::from(e));
            }

            let result = self.run_locked(command).await;
            // failures before a dirty record was written leave nothing to repair
            if result.is_err()
                && matches!(
                    self.state,
                    EngineState::Planning | EngineState::Applying { .. }
                )
            {
                self.state = EngineState::Idle;
            }

            match (result, self.store.unlock().await) {
                (Ok(report), Ok(())) => Ok(report),
                (Ok(_), Err(unlock_err)) => Err(unlock_err.into()),
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(unlock_err)) => {
                    tracing::warn!(error = %unlock_err, "failed to release migration lock");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_locked(&mut self, command: MigrationCommand) -> MigrateResult<MigrationReport> {
        let started = Instant::now();
        let current = self.store.read().await?;
        tracing::debug!(state = %current, "read schema state");

        if let MigrationCommand::Force(version) = command {
            let forced = SchemaState {
                version,
                dirty: false,
            };
            self.store.write(forced).await?;
            self.state = EngineState::Done { state: forced };
            tracing::info!(previous = %current, state = %forced, "forced schema version");
            return Ok(MigrationReport {
                outcome: Outcome::Forced,
                state: forced,
                applied: Vec::new(),
                execution_time_ms: started.elapsed().as_millis(),
            });
        }

        if current.dirty {
            let version = current.version;
            self.state = EngineState::Dirty { version };
            tracing::error!(state = %current, "schema state is dirty, refusing to migrate");
            return Err(MigrateError::DirtyDatabase { version });
        }

        let plan = Plan::compute(self.reader.index(), current.version, command)?;
        if plan.is_empty() {
            self.state = EngineState::Done { state: current };
            tracing::info!(state = %current, "no migrations to run");
            return Ok(MigrationReport {
                outcome: Outcome::NoChange,
                state: current,
                applied: Vec::new(),
                execution_time_ms: started.elapsed().as_millis(),
            });
        }

        tracing::info!(steps = plan.len(), from = %current, "running migrations");

        let mut applied = Vec::with_capacity(plan.len());
        let mut state = current;

        for planned in &plan.steps {
            self.state = EngineState::Applying {
                version: planned.version,
            };
            let step = self.reader.read_step(planned.version, planned.direction)?;

            self.store.write(SchemaState::dirty(planned.version)).await?;
            // from here on a failure leaves the record dirty at this step
            self.state = EngineState::Dirty {
                version: Some(planned.version),
            };

            let step_started = Instant::now();
            tracing::info!(
                version = planned.version,
                direction = %planned.direction,
                name = %planned.name,
                "applying migration"
            );

            if let Err(source) = self
                .driver
                .execute(&step, self.config.transaction_policy)
                .await
            {
                tracing::error!(
                    version = planned.version,
                    direction = %planned.direction,
                    error = %source,
                    "migration failed, schema state left dirty"
                );
                return Err(MigrateError::Execution {
                    version: planned.version,
                    direction: planned.direction,
                    source,
                });
            }

            state = SchemaState {
                version: planned.resulting_version,
                dirty: false,
            };
            self.store.write(state).await?;

            let duration_ms = step_started.elapsed().as_millis();
            tracing::debug!(
                version = planned.version,
                duration_ms = duration_ms as u64,
                "migration committed"
            );
            applied.push(AppliedStep {
                version: planned.version,
                name: planned.name.clone(),
                direction: planned.direction,
                duration_ms,
            });
        }

        if plan.is_partial() {
            tracing::info!(
                requested = plan.requested,
                applied = applied.len(),
                "fewer migrations remained than requested"
            );
        }

        self.state = EngineState::Done { state };
        tracing::info!(steps = applied.len(), state = %state, "migrations complete");

        Ok(MigrationReport {
            outcome: Outcome::Applied {
                steps: applied.len(),
                partial: plan.is_partial(),
            },
            state,
            applied,
            execution_time_ms: started.elapsed().as_millis(),
        })
    }
}
