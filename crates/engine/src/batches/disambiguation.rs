//! Clarification batches: decide whether a set of guidelines is genuinely
//! ambiguous right now, and if so, what to ask the customer.
//!
//! The same mechanism serves two call sites: one batch per declared
//! disambiguation group during matching, and ad hoc evaluation of conflict
//! targets during conflict resolution.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use waypoint_core::Guideline;

use crate::batch::{BatchCategory, BatchOutcome, MatchingBatch};
use crate::batches::{render_context, render_guidelines};
use crate::context::{DisambiguationProposal, GuidelineMatch, MatchingContext};
use crate::errors::BatchError;
use crate::generation::{GenerationHints, GenerationInfo, ModelClient};
use crate::schema::{self, DisambiguationReply};

pub struct DisambiguationBatch {
    context: Arc<MatchingContext>,
    model: Arc<dyn ModelClient>,
    /// The observation guideline that declared the group. Absent when the
    /// batch evaluates conflict targets instead of a declared group.
    source: Option<Guideline>,
    candidates: Vec<Guideline>,
}

impl DisambiguationBatch {
    /// One batch per declared disambiguation group.
    pub fn for_group(
        context: Arc<MatchingContext>,
        model: Arc<dyn ModelClient>,
        source: Guideline,
        targets: Vec<Guideline>,
    ) -> Self {
        Self { context, model, source: Some(source), candidates: targets }
    }

    /// Conflict-resolution evaluation over already-matched guidelines.
    pub fn for_conflict(
        context: Arc<MatchingContext>,
        model: Arc<dyn ModelClient>,
        candidates: Vec<Guideline>,
    ) -> Self {
        Self { context, model, source: None, candidates }
    }

    fn prompt(&self) -> String {
        let mut prompt = render_context(&self.context);

        if let Some(source) = &self.source {
            let _ = writeln!(
                prompt,
                "\nAn ambiguity watch is declared for: {}",
                source.content.condition
            );
        }

        let _ = writeln!(
            prompt,
            "\nThe following guidelines may conflict over the customer's current intent:"
        );
        prompt.push_str(&render_guidelines(&self.candidates));
        let _ = writeln!(
            prompt,
            "\nDecide whether the customer's intent is genuinely ambiguous between two or \
             more of these right now. If the conversation already resolves the choice, no \
             clarification is needed. Reply with JSON only: \
             {{\"clarification_needed\": <bool>, \"clarification\": \"<question to ask the \
             customer, when needed>\", \"target_numbers\": [<1-based numbers of the \
             guidelines in conflict>]}}."
        );
        prompt
    }

    /// Run the model once and map the reply to an optional proposal. The
    /// proposal's target list falls back to every candidate when the model
    /// does not narrow it down.
    pub async fn evaluate(
        &self,
        hints: GenerationHints,
    ) -> Result<(Option<DisambiguationProposal>, GenerationInfo), BatchError> {
        let prompt = self.prompt();
        let response =
            self.model.generate(&prompt, hints).await.map_err(BatchError::Model)?;

        let reply: DisambiguationReply = schema::parse_reply(&response.text)?;
        schema::validate_disambiguation(&reply, self.candidates.len())?;

        let proposal = if reply.clarification_needed {
            let targets = if reply.target_numbers.len() >= 2 {
                reply
                    .target_numbers
                    .iter()
                    .map(|number| self.candidates[number - 1].id.clone())
                    .collect()
            } else {
                self.candidates.iter().map(|candidate| candidate.id.clone()).collect()
            };
            Some(DisambiguationProposal {
                clarification: reply.clarification.unwrap_or_default(),
                targets,
            })
        } else {
            None
        };

        debug!(
            event_name = "matching.disambiguation.evaluated",
            session_id = %self.context.session.id,
            candidate_count = self.candidates.len(),
            clarification_needed = proposal.is_some(),
            "disambiguation batch evaluated"
        );

        Ok((proposal, response.info))
    }
}

#[async_trait]
impl MatchingBatch for DisambiguationBatch {
    fn category(&self) -> BatchCategory {
        BatchCategory::Disambiguation
    }

    fn guideline_count(&self) -> usize {
        self.candidates.len()
    }

    async fn process(&self, hints: GenerationHints) -> Result<BatchOutcome, BatchError> {
        let (proposal, telemetry) = self.evaluate(hints).await?;

        let matches = match (proposal, &self.source) {
            (Some(proposal), Some(source)) => vec![GuidelineMatch::new(
                source.clone(),
                10,
                "the customer's intent is ambiguous between the listed guidelines",
            )
            .with_disambiguation(proposal)],
            _ => Vec::new(),
        };

        Ok(BatchOutcome { matches, telemetry })
    }
}
