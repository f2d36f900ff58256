//! Default strategy: classification into disjoint categories, size-based
//! batch creation, and conflict resolution over the merged matches.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use waypoint_core::{Guideline, GuidelineId, JourneyId, MatchingConfig};

use crate::batch::{BatchCategory, BatchSizePolicy, DefaultBatchSizePolicy, MatchingBatch};
use crate::batches::{DisambiguationBatch, GenericMatchingBatch, JourneyStepSelectionBatch};
use crate::context::{GuidelineMatch, MatchingContext};
use crate::errors::{BatchError, StrategyError};
use crate::generation::{GenerationHints, ModelClient};
use crate::strategy::{MatchingStrategy, StrategyTransform};

/// Per-pass partition of one strategy's guidelines. Every guideline lands in
/// exactly one place, or is dropped (inactive-journey steps only).
#[derive(Debug, Default)]
pub(crate) struct Classification {
    pub observational: Vec<Guideline>,
    pub actionable: Vec<Guideline>,
    pub previously_applied: Vec<Guideline>,
    pub previously_applied_customer_dependent: Vec<Guideline>,
    /// Source guideline plus its resolved target guidelines, one entry per
    /// disambiguation group.
    pub disambiguation_groups: Vec<(Guideline, Vec<Guideline>)>,
    /// Step guidelines per active journey, in first-seen journey order.
    pub journey_steps: Vec<(JourneyId, Vec<Guideline>)>,
}

pub struct GenericMatchingStrategy {
    model: Arc<dyn ModelClient>,
    config: MatchingConfig,
    size_policy: Arc<dyn BatchSizePolicy>,
}

impl GenericMatchingStrategy {
    pub fn new(model: Arc<dyn ModelClient>, config: MatchingConfig) -> Self {
        Self { model, config, size_policy: Arc::new(DefaultBatchSizePolicy) }
    }

    pub fn with_size_policy(mut self, policy: Arc<dyn BatchSizePolicy>) -> Self {
        self.size_policy = policy;
        self
    }

    /// Assign each guideline to exactly one category. Deterministic in the
    /// guideline order and the context's relationship state.
    pub(crate) fn classify(
        &self,
        context: &MatchingContext,
        own: &[Guideline],
        all: &[Guideline],
    ) -> Classification {
        let candidate_ids: BTreeSet<&GuidelineId> = all.iter().map(|g| &g.id).collect();
        let mut classified = Classification::default();

        for guideline in own {
            if let Some(node_ref) = guideline.journey_node() {
                if context.is_journey_active(&node_ref.journey_id) {
                    let journey_id = node_ref.journey_id.clone();
                    match classified
                        .journey_steps
                        .iter_mut()
                        .find(|(id, _)| id == &journey_id)
                    {
                        Some((_, group)) => group.push(guideline.clone()),
                        None => classified.journey_steps.push((journey_id, vec![guideline.clone()])),
                    }
                }
                // Steps of inactive journeys are never batched.
                continue;
            }

            if guideline.is_observational() {
                let targets = self.disambiguation_targets(context, guideline, all, &candidate_ids);
                if targets.len() >= 2 {
                    classified.disambiguation_groups.push((guideline.clone(), targets));
                } else {
                    classified.observational.push(guideline.clone());
                }
                continue;
            }

            if guideline.metadata.continuous {
                classified.actionable.push(guideline.clone());
            } else if context.previously_applied.contains(&guideline.id) {
                if guideline.metadata.customer_dependent {
                    classified.previously_applied_customer_dependent.push(guideline.clone());
                } else {
                    classified.previously_applied.push(guideline.clone());
                }
            } else {
                classified.actionable.push(guideline.clone());
            }
        }

        classified
    }

    /// Targets of a declared disambiguation group, restricted to the current
    /// candidate set. Empty when the source's ambiguity was already answered
    /// this session, so a resolved ambiguity is never re-raised.
    fn disambiguation_targets(
        &self,
        context: &MatchingContext,
        source: &Guideline,
        all: &[Guideline],
        candidate_ids: &BTreeSet<&GuidelineId>,
    ) -> Vec<Guideline> {
        if context.resolved_disambiguations.contains(&source.id) {
            return Vec::new();
        }
        let Some(target_ids) = context.disambiguations.targets_of(&source.id) else {
            return Vec::new();
        };
        target_ids
            .iter()
            .filter(|id| candidate_ids.contains(id))
            .filter_map(|id| all.iter().find(|g| &g.id == id).cloned())
            .collect()
    }

    fn size_based_batches(
        &self,
        category: BatchCategory,
        context: &Arc<MatchingContext>,
        guidelines: &[Guideline],
        out: &mut Vec<Box<dyn MatchingBatch>>,
    ) {
        if guidelines.is_empty() {
            return;
        }
        let size = self.size_policy.batch_size(guidelines.len());
        for chunk in guidelines.chunks(size.max(1)) {
            let mut dependent_journeys: Vec<JourneyId> = Vec::new();
            for guideline in chunk {
                for journey_id in context.dependencies.journeys_for(&guideline.id) {
                    if !dependent_journeys.contains(journey_id) {
                        dependent_journeys.push(journey_id.clone());
                    }
                }
            }
            out.push(Box::new(GenericMatchingBatch::new(
                category,
                Arc::clone(context),
                Arc::clone(&self.model),
                chunk.to_vec(),
                dependent_journeys,
            )));
        }
    }

    /// Run a conflict clarification with the same bounded retry and
    /// temperature escalation as ordinary batches.
    async fn clarify_conflict(
        &self,
        context: &Arc<MatchingContext>,
        candidates: Vec<Guideline>,
    ) -> Result<
        (Option<crate::context::DisambiguationProposal>, Vec<crate::generation::GenerationInfo>),
        StrategyError,
    > {
        let batch = DisambiguationBatch::for_conflict(
            Arc::clone(context),
            Arc::clone(&self.model),
            candidates,
        );

        let mut telemetry = Vec::new();
        let mut last_error: Option<BatchError> = None;
        for attempt in 0..self.config.max_batch_attempts {
            let temperature = temperature_for_attempt(&self.config.temperature_schedule, attempt);
            match batch.evaluate(GenerationHints { temperature }).await {
                Ok((proposal, info)) => {
                    telemetry.push(info);
                    return Ok((proposal, telemetry));
                }
                Err(error) => {
                    warn!(
                        event_name = "matching.conflict.attempt_failed",
                        session_id = %context.session.id,
                        attempt = attempt + 1,
                        error = %error,
                        "conflict clarification attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(StrategyError::Disambiguation {
            attempts: self.config.max_batch_attempts,
            source: last_error.unwrap_or_else(|| {
                BatchError::Model(anyhow::anyhow!("no clarification attempts were made"))
            }),
        })
    }
}

pub(crate) fn temperature_for_attempt(schedule: &[f32], attempt: u32) -> f32 {
    let index = (attempt as usize).min(schedule.len().saturating_sub(1));
    schedule.get(index).copied().unwrap_or(GenerationHints::default().temperature)
}

/// Synthetic transient guideline carrying a clarification question as its
/// action. Exists only inside the returned match list.
fn synthetic_clarification(
    source: &Guideline,
    proposal: crate::context::DisambiguationProposal,
    score: u8,
    rationale: impl Into<String>,
) -> GuidelineMatch {
    let guideline = Guideline::actionable(
        format!("{}-clarification", source.id),
        source.content.condition.clone(),
        proposal.clarification.clone(),
    );
    let mut m = GuidelineMatch::new(guideline, score, rationale).with_disambiguation(proposal);
    m.metadata.synthetic = true;
    m
}

#[async_trait]
impl MatchingStrategy for GenericMatchingStrategy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn create_batches(
        &self,
        context: &Arc<MatchingContext>,
        own: &[Guideline],
        all: &[Guideline],
    ) -> Result<Vec<Box<dyn MatchingBatch>>, StrategyError> {
        let classified = self.classify(context, own, all);
        let mut batches: Vec<Box<dyn MatchingBatch>> = Vec::new();

        self.size_based_batches(
            BatchCategory::Observational,
            context,
            &classified.observational,
            &mut batches,
        );
        self.size_based_batches(
            BatchCategory::Actionable,
            context,
            &classified.actionable,
            &mut batches,
        );
        self.size_based_batches(
            BatchCategory::PreviouslyApplied,
            context,
            &classified.previously_applied,
            &mut batches,
        );
        self.size_based_batches(
            BatchCategory::PreviouslyAppliedCustomerDependent,
            context,
            &classified.previously_applied_customer_dependent,
            &mut batches,
        );

        for (source, targets) in classified.disambiguation_groups {
            batches.push(Box::new(DisambiguationBatch::for_group(
                Arc::clone(context),
                Arc::clone(&self.model),
                source,
                targets,
            )));
        }

        for (journey_id, candidates) in classified.journey_steps {
            let Some(active) = context.active_journey(&journey_id) else {
                // Classification only admits active journeys.
                return Err(StrategyError::Partition(format!(
                    "journey {journey_id} has step candidates but is not active"
                )));
            };
            batches.push(Box::new(JourneyStepSelectionBatch::new(
                Arc::clone(context),
                Arc::clone(&self.model),
                active.clone(),
                candidates,
            )));
        }

        debug!(
            event_name = "matching.strategy.batches_created",
            session_id = %context.session.id,
            strategy = self.name(),
            batch_count = batches.len(),
            "batches created"
        );

        Ok(batches)
    }

    async fn transform_matches(
        &self,
        context: &Arc<MatchingContext>,
        matches: Vec<GuidelineMatch>,
    ) -> Result<StrategyTransform, StrategyError> {
        let threshold = self.config.confident_score_threshold;
        let tolerance = self.config.journey_score_tolerance;
        let mut telemetry = Vec::new();
        let mut excluded: BTreeSet<GuidelineId> = BTreeSet::new();

        // 1. Disambiguation expansion: a match carrying a proposal becomes a
        //    synthetic clarification; the source and every target drop out.
        let mut expanded: Vec<GuidelineMatch> = Vec::with_capacity(matches.len());
        for m in matches {
            match m.metadata.disambiguation.clone() {
                Some(proposal) if !m.metadata.synthetic => {
                    excluded.insert(m.guideline.id.clone());
                    excluded.extend(proposal.targets.iter().cloned());
                    expanded.push(synthetic_clarification(
                        &m.guideline,
                        proposal,
                        m.score,
                        m.rationale.clone(),
                    ));
                }
                _ => expanded.push(m),
            }
        }
        expanded.retain(|m| m.metadata.synthetic || !excluded.contains(&m.guideline.id));

        // 2. Journey-entry collection: single best confident entry per journey.
        let mut best_entries: BTreeMap<JourneyId, usize> = BTreeMap::new();
        for (index, m) in expanded.iter().enumerate() {
            if m.metadata.synthetic || m.metadata.step_selection_journey_id.is_some() {
                continue;
            }
            let Some(journey_id) = m.guideline.journey_entry() else {
                continue;
            };
            if !m.is_confident(threshold) {
                continue;
            }
            match best_entries.get(journey_id) {
                Some(&best) if expanded[best].score >= m.score => {}
                _ => {
                    best_entries.insert(journey_id.clone(), index);
                }
            }
        }

        // 3. Conflict detection over entries only.
        let mut conflict_indices: Vec<usize> = Vec::new();
        if best_entries.len() >= 2 {
            conflict_indices.extend(best_entries.values().copied());
        } else if let Some((_, &entry_index)) = best_entries.iter().next() {
            let entry_score = expanded[entry_index].score;
            let rivals: Vec<usize> = expanded
                .iter()
                .enumerate()
                .filter(|(index, m)| {
                    *index != entry_index
                        && !m.metadata.synthetic
                        && m.metadata.step_selection_journey_id.is_none()
                        && m.guideline.journey_entry().is_none()
                        && !m.guideline.is_observational()
                        && m.is_confident(threshold)
                        && entry_score.abs_diff(m.score) <= tolerance
                })
                .map(|(index, _)| index)
                .collect();
            if !rivals.is_empty() {
                conflict_indices.push(entry_index);
                conflict_indices.extend(rivals);
            }
        }
        conflict_indices.sort_unstable();

        // 4. Resolution: ask the model whether the conflict is genuine.
        let mut conflict_detected = false;
        if conflict_indices.len() >= 2 {
            conflict_detected = true;
            let candidates: Vec<Guideline> = conflict_indices
                .iter()
                .map(|&index| expanded[index].guideline.clone())
                .collect();
            let (proposal, mut conflict_telemetry) =
                self.clarify_conflict(context, candidates).await?;
            telemetry.append(&mut conflict_telemetry);

            if let Some(proposal) = proposal {
                let conflicted_journeys: BTreeSet<JourneyId> = conflict_indices
                    .iter()
                    .filter_map(|&index| expanded[index].guideline.journey_entry().cloned())
                    .collect();
                let conflicted_ids: BTreeSet<GuidelineId> = conflict_indices
                    .iter()
                    .map(|&index| expanded[index].guideline.id.clone())
                    .collect();

                let source = expanded[conflict_indices[0]].guideline.clone();
                expanded.retain(|m| {
                    if m.metadata.synthetic {
                        return true;
                    }
                    if conflicted_ids.contains(&m.guideline.id) {
                        return false;
                    }
                    // A conflicted journey loses its step selections too.
                    !m.metadata
                        .step_selection_journey_id
                        .as_ref()
                        .is_some_and(|journey_id| conflicted_journeys.contains(journey_id))
                });
                expanded.push(synthetic_clarification(
                    &source,
                    proposal,
                    threshold,
                    "multiple confident guidelines pull the next action in different directions",
                ));

                debug!(
                    event_name = "matching.conflict.clarified",
                    session_id = %context.session.id,
                    conflict_count = conflicted_ids.len(),
                    "conflict replaced by clarification"
                );
            }
        }

        // 5. Single-journey dominance. Skipped whenever a conflict was
        //    detected this pass, even one the model waved through.
        if !conflict_detected && best_entries.len() == 1 {
            if let Some((dominant, &entry_index)) = best_entries.iter().next() {
                let dominant = dominant.clone();
                let entry_id = expanded[entry_index].guideline.id.clone();
                expanded.retain(|m| {
                    if m.metadata.synthetic || m.guideline.id == entry_id {
                        return true;
                    }
                    if let Some(journey_id) = &m.metadata.step_selection_journey_id {
                        return journey_id == &dominant;
                    }
                    if let Some(journey_id) = m.guideline.journey_entry() {
                        return journey_id == &dominant;
                    }
                    // Plain actionables yield to the dominant journey;
                    // observations are unaffected.
                    m.guideline.is_observational()
                });

                debug!(
                    event_name = "matching.dominance.applied",
                    session_id = %context.session.id,
                    journey_id = %dominant,
                    "single-journey dominance applied"
                );
            }
        }

        Ok(StrategyTransform { matches: expanded, telemetry })
    }
}
