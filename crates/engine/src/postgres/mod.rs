//! PostgreSQL collaborators.
//!
//! One [`PgSession`] owns the single connection of an invocation. The version
//! store and the driver it hands out share that connection, which keeps the
//! session-level advisory lock alive for exactly as long as the run.

mod driver;
mod store;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, PgConnection};
use std::sync::Arc;
use stepwise_core::{DatabaseConfig, SslMode};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::definitions::MigratorConfig;

pub use driver::PgDriver;
pub use store::PgVersionStore;

/// The connection shared by a run's store and driver
#[derive(Clone)]
pub struct PgSession {
    conn: Arc<Mutex<PgConnection>>,
    database: String,
}

impl PgSession {
    /// Connect, verify the connection and apply session settings
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let options = connect_options(config);

        let mut conn = tokio::time::timeout(config.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "connecting to {} timed out after {:?}",
                        config.display_target(),
                        config.connect_timeout
                    ),
                ))
            })??;

        conn.ping().await?;

        if let Some(timeout) = config.statement_timeout {
            let sql = format!("SET statement_timeout = {}", timeout.as_millis());
            sqlx::query(&sql).execute(&mut conn).await?;
        }

        tracing::debug!(target = %config.display_target(), "connected to database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            database: config.dbname.clone(),
        })
    }

    /// Create the namespace schema if it does not exist yet.
    /// Returns whether it was created.
    pub async fn ensure_schema(&self, schema: &str) -> Result<bool, sqlx::Error> {
        let mut conn = self.conn.lock().await;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&mut *conn)
        .await?;

        if exists {
            return Ok(false);
        }

        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
        sqlx::query(&sql).execute(&mut *conn).await?;
        tracing::info!(schema, "created schema");
        Ok(true)
    }

    /// Version store for the configured namespace and table
    pub fn version_store(&self, config: &MigratorConfig) -> PgVersionStore {
        PgVersionStore::new(
            Arc::clone(&self.conn),
            &config.namespace,
            &config.migrations_table,
            lock_key(&self.database, &config.namespace, &config.migrations_table),
        )
    }

    pub fn driver(&self) -> PgDriver {
        PgDriver::new(Arc::clone(&self.conn))
    }

    /// Close the connection if this is the last handle to it; otherwise it
    /// closes when the last store or driver is dropped.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        match Arc::try_unwrap(self.conn) {
            Ok(conn) => conn.into_inner().close().await,
            Err(_) => Ok(()),
        }
    }
}

pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.dbname)
        .ssl_mode(ssl_mode(config.sslmode))
        .application_name("stepwise")
}

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Quote an identifier for interpolation into SQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Advisory lock key for one database/namespace/table triple.
///
/// Derived from a name-based UUID so every process computes the same key.
pub fn lock_key(database: &str, namespace: &str, table: &str) -> i64 {
    let name = format!("{}\0{}\0{}", database, namespace, table);
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&uuid.as_bytes()[..8]);
    i64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("billing"), "\"billing\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_lock_key_is_stable_and_scoped() {
        let a = lock_key("app", "billing", "schema_migrations");
        assert_eq!(a, lock_key("app", "billing", "schema_migrations"));
        assert_ne!(a, lock_key("app", "inventory", "schema_migrations"));
        assert_ne!(a, lock_key("other", "billing", "schema_migrations"));
        // separators keep "ab"+"c" apart from "a"+"bc"
        assert_ne!(lock_key("x", "ab", "c"), lock_key("x", "a", "bc"));
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(ssl_mode(SslMode::Disable), PgSslMode::Disable));
        assert!(matches!(ssl_mode(SslMode::VerifyFull), PgSslMode::VerifyFull));
    }
}
