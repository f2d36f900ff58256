use thiserror::Error;

use waypoint_core::SessionId;

use crate::batch::BatchCategory;
use crate::generation::GenerationInfo;
use crate::schema::SchemaError;

/// Failure of a single batch attempt. Any variant is retryable until the
/// batch's attempt budget runs out.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("model invocation failed: {0}")]
    Model(#[source] anyhow::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("invalid guideline partition: {0}")]
    Partition(String),
    #[error("conflict clarification failed after {attempts} attempts")]
    Disambiguation {
        attempts: u32,
        #[source]
        source: BatchError,
    },
}

/// Telemetry salvaged from the batches that had already completed when a
/// matching pass was cancelled. Consuming it via [`into_telemetry`] is the
/// one and only read.
///
/// [`into_telemetry`]: CancellationReceipt::into_telemetry
#[derive(Debug)]
pub struct CancellationReceipt {
    pub session_id: SessionId,
    telemetry: Vec<GenerationInfo>,
}

impl CancellationReceipt {
    pub fn new(session_id: SessionId, telemetry: Vec<GenerationInfo>) -> Self {
        Self { session_id, telemetry }
    }

    pub fn completed_batches(&self) -> usize {
        self.telemetry.len()
    }

    pub fn into_telemetry(self) -> Vec<GenerationInfo> {
        self.telemetry
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Defensive: the partition invariant makes this unreachable for any
    /// well-formed candidate set.
    #[error("guideline classification failed: {0}")]
    Classification(String),
    #[error("{category:?} batch of strategy `{strategy}` failed after {attempts} attempts")]
    BatchFailed {
        strategy: &'static str,
        category: BatchCategory,
        attempts: u32,
        #[source]
        source: BatchError,
    },
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    /// The caller's deadline fired while batches were in flight. Carries the
    /// work that finished before the cancellation instant; never a failure.
    #[error("matching pass cancelled for session {}", .0.session_id)]
    Cancelled(CancellationReceipt),
    #[error("batch task aborted unexpectedly: {0}")]
    TaskPanicked(String),
}

impl EngineError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
