//! Concrete batch types. Each varies only in prompt and result mapping; the
//! uniform contract lives in [`crate::batch`].

pub mod disambiguation;
pub mod generic;
pub mod journey_step;
pub mod response_analysis;

pub use disambiguation::DisambiguationBatch;
pub use generic::GenericMatchingBatch;
pub use journey_step::JourneyStepSelectionBatch;
pub use response_analysis::{AdherenceOutcome, ResponseAnalysisBatch};

use std::fmt::Write as _;

use waypoint_core::{Event, EventKind, EventSource, Guideline};

use crate::context::MatchingContext;

/// Shared prompt preamble: who is talking to whom, with what vocabulary and
/// capabilities, and what has been said so far.
pub(crate) fn render_context(context: &MatchingContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "You support the agent \"{}\".", context.agent.name);
    if let Some(description) = &context.agent.description {
        let _ = writeln!(out, "Agent description: {description}");
    }
    let _ = writeln!(out, "The customer is \"{}\".", context.customer.name);

    if !context.variables.is_empty() {
        let _ = writeln!(out, "\nContext variables:");
        for variable in &context.variables {
            let _ = writeln!(out, "- {} = {}", variable.name, variable.value);
        }
    }

    if !context.terms.is_empty() {
        let _ = writeln!(out, "\nGlossary:");
        for term in &context.terms {
            let synonyms = if term.synonyms.is_empty() {
                String::new()
            } else {
                format!(" (also: {})", term.synonyms.join(", "))
            };
            let _ = writeln!(out, "- {}{synonyms}: {}", term.name, term.description);
        }
    }

    if !context.capabilities.is_empty() {
        let _ = writeln!(out, "\nAgent capabilities:");
        for capability in &context.capabilities {
            let _ = writeln!(out, "- {}: {}", capability.title, capability.description);
        }
    }

    let _ = writeln!(out, "\nInteraction so far:");
    out.push_str(&render_events(&context.history));

    if !context.staged_events.is_empty() {
        let _ = writeln!(out, "\nAlready staged for this turn:");
        out.push_str(&render_events(&context.staged_events));
    }

    out
}

pub(crate) fn render_events(events: &[Event]) -> String {
    let mut out = String::new();
    for event in events {
        let speaker = match event.source {
            EventSource::Customer => "customer",
            EventSource::Agent => "agent",
            EventSource::System => "system",
        };
        match event.kind {
            EventKind::Message => {
                let text = event.message_text().unwrap_or("<non-text message>");
                let _ = writeln!(out, "{speaker}: {text}");
            }
            EventKind::ToolResult => {
                let _ = writeln!(out, "{speaker} tool result: {}", event.payload);
            }
            EventKind::StatusUpdate => {
                let _ = writeln!(out, "{speaker} status: {}", event.payload);
            }
        }
    }
    if out.is_empty() {
        out.push_str("(no messages yet)\n");
    }
    out
}

/// Numbered guideline listing; numbers are 1-based and match the reply
/// schema's `guideline_number`.
pub(crate) fn render_guidelines(guidelines: &[Guideline]) -> String {
    let mut out = String::new();
    for (index, guideline) in guidelines.iter().enumerate() {
        let _ = writeln!(out, "{}. when: {}", index + 1, guideline.content.condition);
        match &guideline.content.action {
            Some(action) => {
                let _ = writeln!(out, "   then: {action}");
            }
            None => {
                let _ = writeln!(out, "   then: (observation only)");
            }
        }
    }
    out
}
