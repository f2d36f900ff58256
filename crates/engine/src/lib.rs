//! Per-turn decision core for a conversational agent runtime.
//!
//! Given the current dialogue state and a heterogeneous set of candidate
//! guidelines, this crate selects the final, conflict-free set of applicable
//! guidelines and decides which active journeys continue executing. Model
//! calls are the evaluation primitive; everything around them — partitioning
//! into batches, concurrent execution with bounded retry, cancellation
//! salvage, and conflict resolution — lives here.
//!
//! The flow per turn:
//! 1. [`orchestrator::MatchingOrchestrator::match_guidelines`] groups
//!    candidates by resolved strategy and asks each strategy for batches.
//! 2. All batches run concurrently, each wrapped in a bounded retry with an
//!    escalating temperature schedule.
//! 3. Results merge in batch-creation order; each strategy's conflict
//!    resolution runs over the merged list (disambiguation expansion,
//!    journey dominance).
//!
//! Model invocation, guideline storage, journey building, and persistence
//! are external collaborators behind the traits and read-only carriers in
//! [`generation`] and [`context`].

pub mod batch;
pub mod batches;
pub mod context;
pub mod errors;
pub mod generation;
pub mod generic_strategy;
pub mod orchestrator;
pub mod schema;
pub mod strategy;
pub mod testing;

pub use batch::{BatchCategory, BatchOutcome, BatchSizePolicy, DefaultBatchSizePolicy, MatchingBatch};
pub use context::{
    DisambiguationProposal, GuidelineAdherence, GuidelineMatch, MatchMetadata, MatchingContext,
    MatchingResult, ResponseAnalysisResult,
};
pub use errors::{BatchError, CancellationReceipt, EngineError, StrategyError};
pub use generation::{GenerationHints, GenerationInfo, ModelClient, ModelResponse, TokenUsage};
pub use generic_strategy::GenericMatchingStrategy;
pub use orchestrator::MatchingOrchestrator;
pub use strategy::{MatchingStrategy, StrategyResolver, StrategyTransform};
