use thiserror::Error;

use crate::domain::guideline::GuidelineId;
use crate::domain::journey::{JourneyId, JourneyNodeId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid guideline tag: {0}")]
    InvalidTag(String),
    #[error("disambiguation group for {source_id} needs at least two targets, got {target_count}")]
    InvalidDisambiguationGroup { source_id: GuidelineId, target_count: usize },
    #[error("journey {journey} has no node {node}")]
    UnknownJourneyNode { journey: JourneyId, node: JourneyNodeId },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
