//! Size-based evaluation batch for the four generic categories.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use waypoint_core::{Guideline, JourneyId};

use crate::batch::{BatchCategory, BatchOutcome, MatchingBatch};
use crate::batches::{render_context, render_guidelines};
use crate::context::{GuidelineMatch, MatchingContext};
use crate::errors::BatchError;
use crate::generation::{GenerationHints, ModelClient};
use crate::schema::{self, MatchesReply};

pub struct GenericMatchingBatch {
    category: BatchCategory,
    context: Arc<MatchingContext>,
    model: Arc<dyn ModelClient>,
    guidelines: Vec<Guideline>,
    /// Journeys any member structurally depends on; prompt context only.
    dependent_journeys: Vec<JourneyId>,
}

impl GenericMatchingBatch {
    pub fn new(
        category: BatchCategory,
        context: Arc<MatchingContext>,
        model: Arc<dyn ModelClient>,
        guidelines: Vec<Guideline>,
        dependent_journeys: Vec<JourneyId>,
    ) -> Self {
        debug_assert!(matches!(
            category,
            BatchCategory::Observational
                | BatchCategory::Actionable
                | BatchCategory::PreviouslyApplied
                | BatchCategory::PreviouslyAppliedCustomerDependent
        ));
        Self { category, context, model, guidelines, dependent_journeys }
    }

    fn category_instruction(&self) -> &'static str {
        match self.category {
            BatchCategory::Observational => {
                "Each guideline below is a pure observation with no action. Score how \
                 strongly its condition holds in the current state of the conversation."
            }
            BatchCategory::Actionable => {
                "Score how strongly each guideline's condition applies to the agent's \
                 next action in this conversation."
            }
            BatchCategory::PreviouslyApplied => {
                "Each guideline below was applied in the previous turn. Score whether \
                 its condition applies again, to a new part of the conversation; do not \
                 re-apply it to the part it already addressed."
            }
            BatchCategory::PreviouslyAppliedCustomerDependent => {
                "Each guideline below was applied in the previous turn and its action \
                 waits on data from the customer. Score whether the customer has now \
                 supplied what the action was waiting for."
            }
            _ => unreachable!("generic batch holds a generic category"),
        }
    }

    fn prompt(&self) -> String {
        let mut prompt = render_context(&self.context);

        if !self.dependent_journeys.is_empty() {
            let _ = writeln!(prompt, "\nRelated journeys:");
            for journey_id in &self.dependent_journeys {
                match self.context.journey_title(journey_id) {
                    Some(title) => {
                        let _ = writeln!(prompt, "- {title}");
                    }
                    None => {
                        let _ = writeln!(prompt, "- {journey_id}");
                    }
                }
            }
        }

        let _ = writeln!(prompt, "\n{}", self.category_instruction());
        let _ = writeln!(prompt, "\nGuidelines:");
        prompt.push_str(&render_guidelines(&self.guidelines));
        let _ = writeln!(
            prompt,
            "\nReply with JSON only: {{\"checks\": [{{\"guideline_number\": <1-based>, \
             \"score\": <0-10>, \"rationale\": \"<one sentence>\"}}]}} with one check per \
             guideline."
        );
        prompt
    }
}

#[async_trait]
impl MatchingBatch for GenericMatchingBatch {
    fn category(&self) -> BatchCategory {
        self.category
    }

    fn guideline_count(&self) -> usize {
        self.guidelines.len()
    }

    async fn process(&self, hints: GenerationHints) -> Result<BatchOutcome, BatchError> {
        let prompt = self.prompt();
        let response =
            self.model.generate(&prompt, hints).await.map_err(BatchError::Model)?;

        let reply: MatchesReply = schema::parse_reply(&response.text)?;
        schema::validate_checks(&reply, self.guidelines.len())?;

        let matches: Vec<GuidelineMatch> = reply
            .checks
            .into_iter()
            .filter(|check| check.score > 0)
            .map(|check| {
                GuidelineMatch::new(
                    self.guidelines[check.guideline_number - 1].clone(),
                    check.score,
                    check.rationale,
                )
            })
            .collect();

        debug!(
            event_name = "matching.batch.processed",
            session_id = %self.context.session.id,
            category = ?self.category,
            guideline_count = self.guidelines.len(),
            match_count = matches.len(),
            "generic batch processed"
        );

        Ok(BatchOutcome { matches, telemetry: response.info })
    }
}
