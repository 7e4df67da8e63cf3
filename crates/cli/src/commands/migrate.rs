use anyhow::Context;
use stepwise_core::{ConfigValidator, DatabaseConfig, IdentifierValidator};
use stepwise_engine::{
    DirectorySource, MigrationCommand, MigrationDirection, MigrationReport, MigrationRunner,
    MigrationStatus, MigratorConfig, Outcome, PgDriver, PgSession, PgVersionStore, SchemaState, SourceReader,
    TransactionPolicy,
};

use crate::GlobalArgs;

type PgRunner = MigrationRunner<DirectorySource, PgVersionStore, PgDriver>;

/// Validate flags and the migrations directory, then connect and prepare the
/// schema. Nothing touches the database until the source has been indexed.
async fn open(global: &GlobalArgs) -> anyhow::Result<(PgSession, PgRunner)> {
    let schema = global.require_schema()?.to_string();
    let path = global.require_path()?;

    IdentifierValidator { field: "--schema" }.validate(&schema)?;
    IdentifierValidator { field: "--table" }.validate(&global.table)?;

    let reader = SourceReader::open(DirectorySource::open(path)?)?;
    tracing::info!(
        path = %reader.source().root().display(),
        migrations = reader.index().len(),
        "indexed migrations"
    );

    let db = DatabaseConfig::from_env()?;
    db.validate()?;
    tracing::debug!(config = ?db, "database configuration");
    for (key, source) in db.config_sources() {
        tracing::debug!(key = %key, source = %source, "configuration source");
    }

    let session = PgSession::connect(&db)
        .await
        .with_context(|| format!("Failed to connect to database {}", db.display_target()))?;

    session
        .ensure_schema(&schema)
        .await
        .with_context(|| format!("Failed to create schema '{}'", schema))?;

    let policy = if global.no_transaction {
        TransactionPolicy::Disabled
    } else {
        TransactionPolicy::PerStep
    };
    let config = MigratorConfig::new(schema)
        .with_table(global.table.clone())
        .with_transaction_policy(policy);

    let runner = MigrationRunner::new(
        reader.into_source(),
        session.version_store(&config),
        session.driver(),
        &config,
    )?;

    Ok((session, runner))
}

async fn close(session: PgSession, runner: PgRunner) {
    drop(runner);
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "failed to close database connection");
    }
}

/// Run `up`, `down`, `goto` or `force`
pub async fn run(global: &GlobalArgs, command: MigrationCommand) -> anyhow::Result<()> {
    let (session, mut runner) = open(global).await?;
    let result = runner.run(command).await;
    close(session, runner).await;

    let report = result?;
    if global.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", summary(command, &report));
    }
    Ok(())
}

/// Print the recorded version
pub async fn version(global: &GlobalArgs) -> anyhow::Result<()> {
    let (session, mut runner) = open(global).await?;
    let result = runner.version().await;
    close(session, runner).await;

    let state = result?;
    if global.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("Version: {}", state);
    }
    Ok(())
}

/// List every migration against the recorded version
pub async fn status(global: &GlobalArgs) -> anyhow::Result<()> {
    let (session, mut runner) = open(global).await?;
    let result = runner.status().await;
    let state = runner.version().await;
    close(session, runner).await;

    let statuses = result?;
    if global.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        print!("{}", status_table(&statuses, state?));
    }
    Ok(())
}

pub fn summary(command: MigrationCommand, report: &MigrationReport) -> String {
    match report.outcome {
        Outcome::Forced => format!("Version forced to: {}", report.state),
        Outcome::NoChange => match command {
            MigrationCommand::Down(_) | MigrationCommand::Goto(None) => {
                "No migrations to rollback".to_string()
            }
            _ => "No migrations to apply".to_string(),
        },
        Outcome::Applied { steps, .. } => {
            let verb = match report.direction() {
                Some(MigrationDirection::Down) => "Rolled back",
                _ => "Applied",
            };
            format!("{} {} migration(s), now at version {}", verb, steps, report.state)
        }
    }
}

pub fn status_table(statuses: &[MigrationStatus], state: SchemaState) -> String {
    let mut out = format!("Version: {}\n", state);
    if statuses.is_empty() {
        out.push_str("No migrations found\n");
        return out;
    }

    for status in statuses {
        let marker = match (status.applied, status.dirty) {
            (_, true) => "dirty",
            (true, false) => "applied",
            (false, false) => "pending",
        };
        let reversible = if status.reversible { "" } else { " (no down)" };
        out.push_str(&format!(
            "  [{:<7}] {} {}{}\n",
            marker, status.version, status.name, reversible
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_engine::{AppliedStep, Target};

    fn report(outcome: Outcome, state: SchemaState, direction: MigrationDirection) -> MigrationReport {
        let applied = match outcome {
            Outcome::Applied { steps, .. } => (0..steps)
                .map(|i| AppliedStep {
                    version: i as i64 + 1,
                    name: format!("m{}", i + 1),
                    direction,
                    duration_ms: 1,
                })
                .collect(),
            _ => Vec::new(),
        };
        MigrationReport {
            outcome,
            state,
            applied,
            execution_time_ms: 3,
        }
    }

    #[test]
    fn test_summary_lines() {
        let up = MigrationCommand::Up(Target::All);
        let down = MigrationCommand::Down(Target::All);

        let applied = report(
            Outcome::Applied { steps: 3, partial: false },
            SchemaState::clean(3),
            MigrationDirection::Up,
        );
        assert_eq!(summary(up, &applied), "Applied 3 migration(s), now at version 3");

        let rolled = report(
            Outcome::Applied { steps: 1, partial: false },
            SchemaState::clean(2),
            MigrationDirection::Down,
        );
        assert_eq!(summary(down, &rolled), "Rolled back 1 migration(s), now at version 2");

        let none = report(Outcome::NoChange, SchemaState::none(), MigrationDirection::Up);
        assert_eq!(summary(up, &none), "No migrations to apply");
        assert_eq!(summary(down, &none), "No migrations to rollback");

        let forced = report(Outcome::Forced, SchemaState::clean(1), MigrationDirection::Up);
        assert_eq!(summary(MigrationCommand::Force(Some(1)), &forced), "Version forced to: 1");
    }

    #[test]
    fn test_status_table_markers() {
        let statuses = vec![
            MigrationStatus {
                version: 1,
                name: "create_users".to_string(),
                applied: true,
                dirty: false,
                reversible: true,
            },
            MigrationStatus {
                version: 2,
                name: "backfill".to_string(),
                applied: true,
                dirty: true,
                reversible: false,
            },
            MigrationStatus {
                version: 3,
                name: "create_orders".to_string(),
                applied: false,
                dirty: false,
                reversible: true,
            },
        ];

        let table = status_table(&statuses, SchemaState::dirty(2));
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], "Version: 2 (dirty)");
        assert_eq!(lines[1], "  [applied] 1 create_users");
        assert_eq!(lines[2], "  [dirty  ] 2 backfill (no down)");
        assert_eq!(lines[3], "  [pending] 3 create_orders");
    }

    #[test]
    fn test_status_table_empty() {
        let table = status_table(&[], SchemaState::none());
        assert_eq!(table, "Version: (no migrations applied)\nNo migrations found\n");
    }
}
