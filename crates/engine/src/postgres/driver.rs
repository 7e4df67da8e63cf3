use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::definitions::{MigrationStep, TransactionPolicy};
use crate::driver::ExecutionDriver;
use crate::error::DriverError;

/// Runs migration scripts on the session connection.
///
/// Scripts go through the simple query protocol, so a file may hold any
/// number of statements.
pub struct PgDriver {
    conn: Arc<Mutex<PgConnection>>,
}

impl PgDriver {
    pub(super) fn new(conn: Arc<Mutex<PgConnection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ExecutionDriver for PgDriver {
    async fn execute(&mut self, step: &MigrationStep, policy: TransactionPolicy) -> Result<(), DriverError> {
        if step.script.trim().is_empty() {
            tracing::debug!(version = step.version, direction = %step.direction, "empty script");
            return Ok(());
        }

        let mut conn = self.conn.lock().await;

        match policy {
            TransactionPolicy::PerStep => {
                let mut tx = conn.begin().await?;
                (&mut *tx).execute(step.script.as_str()).await?;
                tx.commit().await?;
            }
            TransactionPolicy::Disabled => {
                (&mut *conn).execute(step.script.as_str()).await?;
            }
        }

        Ok(())
    }
}
