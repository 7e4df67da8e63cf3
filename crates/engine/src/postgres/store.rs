use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::quote_ident;
use crate::definitions::SchemaState;
use crate::error::{StoreError, StoreResult};
use crate::store::VersionStore;

/// Version store backed by a single-row tracking table and a session-level
/// advisory lock.
///
/// The table lives in the namespace schema and is created on first use:
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS "<namespace>"."<table>" (
///     version BIGINT NOT NULL PRIMARY KEY,
///     dirty BOOLEAN NOT NULL
/// )
/// ```
pub struct PgVersionStore {
    conn: Arc<Mutex<PgConnection>>,
    namespace: String,
    qualified_table: String,
    lock_key: i64,
    locked: bool,
    table_ready: bool,
}

impl PgVersionStore {
    pub(super) fn new(conn: Arc<Mutex<PgConnection>>, namespace: &str, table: &str, lock_key: i64) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
            qualified_table: format!("{}.{}", quote_ident(namespace), quote_ident(table)),
            lock_key,
            locked: false,
            table_ready: false,
        }
    }

    pub fn qualified_table(&self) -> &str {
        &self.qualified_table
    }

    pub fn lock_key(&self) -> i64 {
        self.lock_key
    }

    async fn ensure_table(&mut self, conn: &mut PgConnection) -> StoreResult<()> {
        if self.table_ready {
            return Ok(());
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT NOT NULL PRIMARY KEY, dirty BOOLEAN NOT NULL)",
            self.qualified_table
        );
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .map_err(unavailable("failed to create version table"))?;

        self.table_ready = true;
        Ok(())
    }
}

#[async_trait]
impl VersionStore for PgVersionStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn lock(&mut self) -> StoreResult<()> {
        if self.locked {
            return Ok(());
        }

        let shared = Arc::clone(&self.conn);
        let mut conn = shared.lock().await;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await
            .map_err(unavailable("failed to acquire advisory lock"))?;

        if !acquired {
            return Err(StoreError::AlreadyLocked {
                namespace: self.namespace.clone(),
            });
        }

        tracing::debug!(namespace = %self.namespace, key = self.lock_key, "acquired migration lock");
        self.locked = true;
        Ok(())
    }

    async fn unlock(&mut self) -> StoreResult<()> {
        if !self.locked {
            return Ok(());
        }

        let shared = Arc::clone(&self.conn);
        let mut conn = shared.lock().await;

        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await
            .map_err(unavailable("failed to release advisory lock"))?;

        self.locked = false;
        if !released {
            tracing::warn!(namespace = %self.namespace, "advisory lock was not held at release");
        }
        Ok(())
    }

    async fn read(&mut self) -> StoreResult<SchemaState> {
        let shared = Arc::clone(&self.conn);
        let mut conn = shared.lock().await;
        self.ensure_table(&mut conn).await?;

        let sql = format!("SELECT version, dirty FROM {} LIMIT 1", self.qualified_table);
        let row: Option<(i64, bool)> = sqlx::query_as(&sql)
            .fetch_optional(&mut *conn)
            .await
            .map_err(unavailable("failed to read schema version"))?;

        Ok(match row {
            Some((version, dirty)) => SchemaState {
                version: Some(version),
                dirty,
            },
            None => SchemaState::none(),
        })
    }

    async fn write(&mut self, state: SchemaState) -> StoreResult<()> {
        let shared = Arc::clone(&self.conn);
        let mut conn = shared.lock().await;
        self.ensure_table(&mut conn).await?;

        let mut tx = conn
            .begin()
            .await
            .map_err(unavailable("failed to begin version update"))?;

        let truncate = format!("TRUNCATE {}", self.qualified_table);
        sqlx::query(&truncate)
            .execute(&mut *tx)
            .await
            .map_err(unavailable("failed to clear schema version"))?;

        // no row means no version applied
        if let Some(version) = state.version {
            let insert = format!(
                "INSERT INTO {} (version, dirty) VALUES ($1, $2)",
                self.qualified_table
            );
            sqlx::query(&insert)
                .bind(version)
                .bind(state.dirty)
                .execute(&mut *tx)
                .await
                .map_err(unavailable("failed to write schema version"))?;
        }

        tx.commit()
            .await
            .map_err(unavailable("failed to commit schema version"))?;

        tracing::debug!(namespace = %self.namespace, state = %state, "recorded schema state");
        Ok(())
    }
}

fn unavailable(message: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::with_source(message, e)
}
