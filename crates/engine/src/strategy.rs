//! The strategy seam: how candidate guidelines become batches, and how the
//! merged matches are post-processed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use waypoint_core::{Guideline, GuidelineTag};

use crate::batch::MatchingBatch;
use crate::context::{GuidelineMatch, MatchingContext};
use crate::errors::StrategyError;
use crate::generation::GenerationInfo;

/// Output of a strategy's post-processing pass. Conflict resolution may make
/// additional model calls; their telemetry rides along so the caller can
/// persist it with the rest of the pass.
#[derive(Debug, Default)]
pub struct StrategyTransform {
    pub matches: Vec<GuidelineMatch>,
    pub telemetry: Vec<GenerationInfo>,
}

/// How one family of guidelines is evaluated. The orchestrator groups
/// candidates by resolved strategy, asks each for batches, and after the
/// merge hands each strategy the full match list to transform.
#[async_trait]
pub trait MatchingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Partition `own` into batches. `all` is the complete candidate set of
    /// the pass, for cross-guideline lookups such as disambiguation targets.
    /// Batch creation order is the deterministic merge order.
    fn create_batches(
        &self,
        context: &Arc<MatchingContext>,
        own: &[Guideline],
        all: &[Guideline],
    ) -> Result<Vec<Box<dyn MatchingBatch>>, StrategyError>;

    /// Post-process the merged match list. Runs once per strategy, in
    /// strategy grouping order, over the whole list.
    async fn transform_matches(
        &self,
        context: &Arc<MatchingContext>,
        matches: Vec<GuidelineMatch>,
    ) -> Result<StrategyTransform, StrategyError>;
}

/// Maps each guideline to the strategy that evaluates it. Pure lookup, no
/// I/O: guidelines carrying a registered label tag route to that strategy,
/// everything else goes to the default.
pub struct StrategyResolver {
    default: Arc<dyn MatchingStrategy>,
    by_label: BTreeMap<String, Arc<dyn MatchingStrategy>>,
}

impl StrategyResolver {
    pub fn new(default: Arc<dyn MatchingStrategy>) -> Self {
        Self { default, by_label: BTreeMap::new() }
    }

    pub fn with_label(
        mut self,
        label: impl Into<String>,
        strategy: Arc<dyn MatchingStrategy>,
    ) -> Self {
        self.by_label.insert(label.into(), strategy);
        self
    }

    pub fn resolve(&self, guideline: &Guideline) -> Arc<dyn MatchingStrategy> {
        for tag in &guideline.tags {
            if let GuidelineTag::Label(label) = tag {
                if let Some(strategy) = self.by_label.get(label) {
                    return Arc::clone(strategy);
                }
            }
        }
        Arc::clone(&self.default)
    }
}
