//! Post-response adherence analysis: after the agent has replied, classify
//! whether each matched guideline was actually followed.
//!
//! This mirrors the matching pass structurally but its output is telemetry
//! for evaluation, never input to the same turn's decision.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;
use waypoint_core::{Event, Guideline};

use crate::batch::BatchCategory;
use crate::batches::{render_context, render_events, render_guidelines};
use crate::context::{GuidelineAdherence, MatchingContext};
use crate::errors::BatchError;
use crate::generation::{GenerationHints, GenerationInfo, ModelClient};
use crate::schema::{self, AdherenceReply};

/// What one completed adherence batch hands back.
#[derive(Clone, Debug)]
pub struct AdherenceOutcome {
    pub adherence: Vec<GuidelineAdherence>,
    pub telemetry: GenerationInfo,
}

pub struct ResponseAnalysisBatch {
    context: Arc<MatchingContext>,
    model: Arc<dyn ModelClient>,
    /// The agent's emitted response events for this turn.
    response_events: Vec<Event>,
    guidelines: Vec<Guideline>,
}

impl ResponseAnalysisBatch {
    pub fn new(
        context: Arc<MatchingContext>,
        model: Arc<dyn ModelClient>,
        response_events: Vec<Event>,
        guidelines: Vec<Guideline>,
    ) -> Self {
        Self { context, model, response_events, guidelines }
    }

    pub fn category(&self) -> BatchCategory {
        BatchCategory::ResponseAnalysis
    }

    pub fn guideline_count(&self) -> usize {
        self.guidelines.len()
    }

    fn prompt(&self) -> String {
        let mut prompt = render_context(&self.context);

        let _ = writeln!(prompt, "\nThe agent responded with:");
        prompt.push_str(&render_events(&self.response_events));

        let _ = writeln!(
            prompt,
            "\nFor each guideline below, judge whether the agent's response adhered to \
             it:"
        );
        prompt.push_str(&render_guidelines(&self.guidelines));
        let _ = writeln!(
            prompt,
            "\nReply with JSON only: {{\"checks\": [{{\"guideline_number\": <1-based>, \
             \"adhered\": <bool>, \"rationale\": \"<one sentence>\"}}]}} with one check \
             per guideline."
        );
        prompt
    }

    pub async fn process(&self, hints: GenerationHints) -> Result<AdherenceOutcome, BatchError> {
        let prompt = self.prompt();
        let response =
            self.model.generate(&prompt, hints).await.map_err(BatchError::Model)?;

        let reply: AdherenceReply = schema::parse_reply(&response.text)?;
        schema::validate_adherence(&reply, self.guidelines.len())?;

        let adherence: Vec<GuidelineAdherence> = reply
            .checks
            .into_iter()
            .map(|check| GuidelineAdherence {
                guideline: self.guidelines[check.guideline_number - 1].clone(),
                adhered: check.adhered,
                rationale: check.rationale,
            })
            .collect();

        debug!(
            event_name = "analysis.batch.processed",
            session_id = %self.context.session.id,
            guideline_count = self.guidelines.len(),
            adhered_count = adherence.iter().filter(|a| a.adhered).count(),
            "response analysis batch processed"
        );

        Ok(AdherenceOutcome { adherence, telemetry: response.info })
    }
}
