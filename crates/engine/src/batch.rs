//! The unit of model-backed evaluation work.

use async_trait::async_trait;
use serde::Serialize;

use crate::context::GuidelineMatch;
use crate::errors::BatchError;
use crate::generation::{GenerationHints, GenerationInfo};

/// Which partition of the candidate set a batch evaluates. Every candidate
/// guideline lands in exactly one category per pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum BatchCategory {
    Observational,
    Actionable,
    PreviouslyApplied,
    PreviouslyAppliedCustomerDependent,
    Disambiguation,
    JourneyStepSelection,
    /// Second-pass adherence classification; not part of the candidate
    /// partition.
    ResponseAnalysis,
}

/// What one completed batch hands back: its matches plus the telemetry of
/// the model call that produced them.
#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub matches: Vec<GuidelineMatch>,
    pub telemetry: GenerationInfo,
}

/// One concurrent unit of evaluation work. Concrete batches vary only in
/// prompt and result mapping; the contract is uniform.
#[async_trait]
pub trait MatchingBatch: Send + Sync {
    fn category(&self) -> BatchCategory;

    /// Number of guidelines this batch evaluates. Logging only.
    fn guideline_count(&self) -> usize;

    async fn process(&self, hints: GenerationHints) -> Result<BatchOutcome, BatchError>;
}

/// External sizing policy for the size-based categories.
pub trait BatchSizePolicy: Send + Sync {
    fn batch_size(&self, category_size: usize) -> usize;
}

/// Small categories go out whole; large ones are chunked so no single prompt
/// carries more than a handful of guidelines.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultBatchSizePolicy;

impl BatchSizePolicy for DefaultBatchSizePolicy {
    fn batch_size(&self, category_size: usize) -> usize {
        match category_size {
            0..=10 => category_size.max(1),
            11..=20 => category_size.div_ceil(2),
            _ => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchSizePolicy, DefaultBatchSizePolicy};

    #[test]
    fn small_categories_stay_whole() {
        let policy = DefaultBatchSizePolicy;
        assert_eq!(policy.batch_size(1), 1);
        assert_eq!(policy.batch_size(10), 10);
    }

    #[test]
    fn mid_categories_split_in_two() {
        let policy = DefaultBatchSizePolicy;
        assert_eq!(policy.batch_size(11), 6);
        assert_eq!(policy.batch_size(20), 10);
    }

    #[test]
    fn large_categories_chunk_at_five() {
        let policy = DefaultBatchSizePolicy;
        assert_eq!(policy.batch_size(21), 5);
        assert_eq!(policy.batch_size(100), 5);
    }

    #[test]
    fn empty_category_never_yields_zero_size() {
        assert_eq!(DefaultBatchSizePolicy.batch_size(0), 1);
    }
}
