//! Execution Driver - runs one step's script against the target database.

pub mod recording;

use async_trait::async_trait;

use crate::definitions::{MigrationStep, TransactionPolicy};
use crate::error::DriverError;

pub use recording::{ExecutedStep, RecordingDriver};

/// Applies a single migration step.
///
/// Under [`TransactionPolicy::PerStep`] the step is all-or-nothing: any failing
/// statement rolls back everything the script did. Drivers never retry.
#[async_trait]
pub trait ExecutionDriver: Send {
    async fn execute(
        &mut self,
        step: &MigrationStep,
        policy: TransactionPolicy,
    ) -> Result<(), DriverError>;
}
