//! Immutable value objects passed into and out of a matching pass.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use waypoint_core::{
    ActiveJourney, Agent, Capability, ContextVariable, Customer, DependencyIndex,
    DisambiguationIndex, Event, Guideline, GuidelineId, Journey, JourneyId, JourneyPath, Session,
    Term,
};

use crate::generation::GenerationInfo;

/// Everything the matching pass may read about the current turn. Built by
/// the caller once per turn and shared across batches; nothing in the core
/// mutates it.
#[derive(Clone, Debug)]
pub struct MatchingContext {
    pub agent: Agent,
    pub session: Session,
    pub customer: Customer,
    pub variables: Vec<ContextVariable>,
    /// Ordered interaction history, oldest first.
    pub history: Vec<Event>,
    pub terms: Vec<Term>,
    pub capabilities: Vec<Capability>,
    /// Tool/message events already staged for this turn but not yet emitted.
    pub staged_events: Vec<Event>,
    pub active_journeys: Vec<ActiveJourney>,
    /// Guidelines applied in the immediately preceding turn.
    pub previously_applied: BTreeSet<GuidelineId>,
    /// Disambiguation sources whose ambiguity the customer already answered;
    /// tracked externally so a resolved ambiguity is not re-raised.
    pub resolved_disambiguations: BTreeSet<GuidelineId>,
    pub disambiguations: DisambiguationIndex,
    pub dependencies: DependencyIndex,
}

impl MatchingContext {
    pub fn is_journey_active(&self, journey_id: &JourneyId) -> bool {
        self.active_journeys.iter().any(|active| &active.journey.id == journey_id)
    }

    pub fn active_journey(&self, journey_id: &JourneyId) -> Option<&ActiveJourney> {
        self.active_journeys.iter().find(|active| &active.journey.id == journey_id)
    }

    pub fn journey_path(&self, journey_id: &JourneyId) -> Option<&JourneyPath> {
        self.active_journey(journey_id).map(|active| &active.path)
    }

    pub fn journey_title(&self, journey_id: &JourneyId) -> Option<&str> {
        self.active_journey(journey_id).map(|active| active.journey.title.as_str())
    }

    pub fn journey(&self, journey_id: &JourneyId) -> Option<&Journey> {
        self.active_journey(journey_id).map(|active| &active.journey)
    }
}

/// A clarification the model proposed for a genuine, unresolved ambiguity
/// among two or more guidelines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisambiguationProposal {
    pub clarification: String,
    pub targets: Vec<GuidelineId>,
}

/// Typed per-match annotations. Ephemeral, like the match itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchMetadata {
    /// Present when the model judged this match an unresolved ambiguity.
    pub disambiguation: Option<DisambiguationProposal>,
    /// Present when this match is a journey-step selection rather than an
    /// independent decision.
    pub step_selection_journey_id: Option<JourneyId>,
    /// Set on transient clarification guidelines fabricated during conflict
    /// resolution.
    pub synthetic: bool,
}

/// One applicable guideline with the model's confidence and reasoning.
/// Created and consumed within a single matching pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineMatch {
    pub guideline: Guideline,
    /// Confidence on a bounded 0..=10 integer scale.
    pub score: u8,
    pub rationale: String,
    pub metadata: MatchMetadata,
}

impl GuidelineMatch {
    pub fn new(guideline: Guideline, score: u8, rationale: impl Into<String>) -> Self {
        Self {
            guideline,
            score: score.min(10),
            rationale: rationale.into(),
            metadata: MatchMetadata::default(),
        }
    }

    pub fn with_disambiguation(mut self, proposal: DisambiguationProposal) -> Self {
        self.metadata.disambiguation = Some(proposal);
        self
    }

    pub fn for_journey_step(mut self, journey_id: JourneyId) -> Self {
        self.metadata.step_selection_journey_id = Some(journey_id);
        self
    }

    pub fn is_confident(&self, threshold: u8) -> bool {
        self.score >= threshold
    }
}

/// Final output of a matching pass: surviving matches in deterministic merge
/// order plus the generation telemetry of every batch, for persistence by
/// the caller.
#[derive(Clone, Debug)]
pub struct MatchingResult {
    pub matches: Vec<GuidelineMatch>,
    pub telemetry: Vec<GenerationInfo>,
}

/// Post-response adherence classification for one guideline. Telemetry
/// input for evaluation; never feeds back into the same turn's decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineAdherence {
    pub guideline: Guideline,
    pub adhered: bool,
    pub rationale: String,
}

#[derive(Clone, Debug)]
pub struct ResponseAnalysisResult {
    pub adherence: Vec<GuidelineAdherence>,
    pub telemetry: Vec<GenerationInfo>,
}
