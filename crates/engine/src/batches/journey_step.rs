//! Step selection for one active journey: which node, if any, should the
//! journey advance to this turn.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use waypoint_core::{ActiveJourney, Guideline, JourneyId};

use crate::batch::{BatchCategory, BatchOutcome, MatchingBatch};
use crate::batches::{render_context, render_guidelines};
use crate::context::{GuidelineMatch, MatchingContext};
use crate::errors::BatchError;
use crate::generation::{GenerationHints, ModelClient};
use crate::schema::{self, MatchesReply};

/// One batch per active journey. Candidates are the step guidelines the
/// journey can legally move to from its current position; the caller
/// computes that set from the journey graph.
pub struct JourneyStepSelectionBatch {
    context: Arc<MatchingContext>,
    model: Arc<dyn ModelClient>,
    journey: ActiveJourney,
    candidates: Vec<Guideline>,
}

impl JourneyStepSelectionBatch {
    pub fn new(
        context: Arc<MatchingContext>,
        model: Arc<dyn ModelClient>,
        journey: ActiveJourney,
        candidates: Vec<Guideline>,
    ) -> Self {
        Self { context, model, journey, candidates }
    }

    pub fn journey_id(&self) -> &JourneyId {
        &self.journey.journey.id
    }

    fn prompt(&self) -> String {
        let mut prompt = render_context(&self.context);

        let _ = writeln!(
            prompt,
            "\nThe journey \"{}\" is in progress.",
            self.journey.journey.title
        );
        if self.journey.path.is_empty() {
            let _ = writeln!(prompt, "No steps have been taken yet.");
        } else {
            let _ = writeln!(prompt, "Steps taken so far, in order:");
            for entry in &self.journey.path.0 {
                match entry {
                    Some(guideline_id) => {
                        let _ = writeln!(prompt, "- {guideline_id}");
                    }
                    None => {
                        let _ = writeln!(prompt, "- (unrecorded step)");
                    }
                }
            }
        }

        let _ = writeln!(
            prompt,
            "\nThe journey can move to exactly one of the following steps this turn, \
             or stay put if none applies yet. Score each step's applicability:"
        );
        prompt.push_str(&render_guidelines(&self.candidates));
        let _ = writeln!(
            prompt,
            "\nReply with JSON only: {{\"checks\": [{{\"guideline_number\": <1-based>, \
             \"score\": <0-10>, \"rationale\": \"<one sentence>\"}}]}} with one check per \
             step."
        );
        prompt
    }
}

#[async_trait]
impl MatchingBatch for JourneyStepSelectionBatch {
    fn category(&self) -> BatchCategory {
        BatchCategory::JourneyStepSelection
    }

    fn guideline_count(&self) -> usize {
        self.candidates.len()
    }

    async fn process(&self, hints: GenerationHints) -> Result<BatchOutcome, BatchError> {
        let prompt = self.prompt();
        let response =
            self.model.generate(&prompt, hints).await.map_err(BatchError::Model)?;

        let reply: MatchesReply = schema::parse_reply(&response.text)?;
        schema::validate_checks(&reply, self.candidates.len())?;

        let matches: Vec<GuidelineMatch> = reply
            .checks
            .into_iter()
            .filter(|check| check.score > 0)
            .map(|check| {
                GuidelineMatch::new(
                    self.candidates[check.guideline_number - 1].clone(),
                    check.score,
                    check.rationale,
                )
                .for_journey_step(self.journey.journey.id.clone())
            })
            .collect();

        debug!(
            event_name = "matching.journey_step.processed",
            session_id = %self.context.session.id,
            journey_id = %self.journey.journey.id,
            candidate_count = self.candidates.len(),
            match_count = matches.len(),
            "journey step selection processed"
        );

        Ok(BatchOutcome { matches, telemetry: response.info })
    }
}
