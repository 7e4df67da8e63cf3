//! Runs against a live PostgreSQL configured through the `DB_*` variables.
//!
//! `cargo test -p stepwise-engine --test postgres -- --ignored`

use stepwise_core::DatabaseConfig;
use stepwise_engine::{
    MemorySource, MigrateError, MigrationDirection, MigrationRunner, MigratorConfig, PgSession,
    SchemaState, Target, VersionStore,
};

fn source() -> MemorySource {
    MemorySource::new()
        .with_migration(
            1,
            "create_accounts",
            "CREATE TABLE accounts (id BIGINT PRIMARY KEY);\nCREATE INDEX accounts_id ON accounts (id);",
            "DROP TABLE accounts;",
        )
        .with_migration(
            2,
            "broken",
            "ALTER TABLE accounts ADD COLUMN name TEXT;\nSELECT missing_column FROM accounts;",
            "ALTER TABLE accounts DROP COLUMN name;",
        )
}

async fn session(schema: &str) -> (PgSession, MigratorConfig) {
    let db = DatabaseConfig::from_env().unwrap();
    let session = PgSession::connect(&db).await.unwrap();
    assert!(session.ensure_schema(schema).await.unwrap());
    (session, MigratorConfig::new(schema))
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_failed_step_rolls_back_and_stays_dirty() {
    let schema = format!("stepwise_test_{}", uuid::Uuid::new_v4().simple());
    let (session, config) = session(&schema).await;

    let mut runner = MigrationRunner::new(
        source(),
        session.version_store(&config),
        session.driver(),
        &config,
    )
    .unwrap();

    let err = runner.up(Target::All).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Execution {
            version: 2,
            direction: MigrationDirection::Up,
            ..
        }
    ));
    assert_eq!(runner.version().await.unwrap(), SchemaState::dirty(2));

    runner.force(Some(1)).await.unwrap();
    let report = runner.down(Target::All).await.unwrap();
    assert_eq!(report.state, SchemaState::none());

    drop(runner);
    session.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_second_session_cannot_take_the_lock() {
    let schema = format!("stepwise_test_{}", uuid::Uuid::new_v4().simple());
    let (first, config) = session(&schema).await;
    let db = DatabaseConfig::from_env().unwrap();
    let second = PgSession::connect(&db).await.unwrap();

    let mut holder = first.version_store(&config);
    holder.lock().await.unwrap();

    let mut runner = MigrationRunner::new(
        source(),
        second.version_store(&config),
        second.driver(),
        &config,
    )
    .unwrap();
    assert!(matches!(
        runner.up(Target::Steps(1)).await,
        Err(MigrateError::AlreadyLocked { .. })
    ));

    holder.unlock().await.unwrap();
    let report = runner.up(Target::Steps(1)).await.unwrap();
    assert_eq!(report.state, SchemaState::clean(1));
}
