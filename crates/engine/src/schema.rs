//! Typed shapes the model is asked to reply in, plus structural validation.
//!
//! A reply that fails to parse or validate is a retryable batch error; the
//! escalating temperature schedule usually shakes a well-formed reply loose
//! on a later attempt.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("model output was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model output failed validation: {0}")]
    Invalid(String),
}

/// Scored evaluation of one numbered guideline.
#[derive(Clone, Debug, Deserialize)]
pub struct GuidelineCheck {
    pub guideline_number: usize,
    pub score: u8,
    pub rationale: String,
}

/// Reply shape for guideline-matching and journey-step-selection batches.
#[derive(Clone, Debug, Deserialize)]
pub struct MatchesReply {
    pub checks: Vec<GuidelineCheck>,
}

/// Reply shape for disambiguation batches.
#[derive(Clone, Debug, Deserialize)]
pub struct DisambiguationReply {
    pub clarification_needed: bool,
    #[serde(default)]
    pub clarification: Option<String>,
    /// Numbers of the candidate guidelines the ambiguity is between.
    #[serde(default)]
    pub target_numbers: Vec<usize>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AdherenceCheck {
    pub guideline_number: usize,
    pub adhered: bool,
    pub rationale: String,
}

/// Reply shape for response-analysis batches.
#[derive(Clone, Debug, Deserialize)]
pub struct AdherenceReply {
    pub checks: Vec<AdherenceCheck>,
}

/// Parse a model reply, tolerating markdown code fences around the JSON.
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, SchemaError> {
    let stripped = strip_code_fences(text);
    Ok(serde_json::from_str(stripped)?)
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag after the opening fence.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest).trim()
}

/// Structural validation shared by the numbered-check reply shapes.
pub fn validate_checks(reply: &MatchesReply, guideline_count: usize) -> Result<(), SchemaError> {
    for check in &reply.checks {
        if check.guideline_number == 0 || check.guideline_number > guideline_count {
            return Err(SchemaError::Invalid(format!(
                "guideline_number {} is out of range 1..={guideline_count}",
                check.guideline_number
            )));
        }
        if check.score > 10 {
            return Err(SchemaError::Invalid(format!(
                "score {} for guideline {} exceeds the 0..=10 scale",
                check.score, check.guideline_number
            )));
        }
    }
    Ok(())
}

pub fn validate_adherence(reply: &AdherenceReply, guideline_count: usize) -> Result<(), SchemaError> {
    for check in &reply.checks {
        if check.guideline_number == 0 || check.guideline_number > guideline_count {
            return Err(SchemaError::Invalid(format!(
                "guideline_number {} is out of range 1..={guideline_count}",
                check.guideline_number
            )));
        }
    }
    Ok(())
}

pub fn validate_disambiguation(
    reply: &DisambiguationReply,
    candidate_count: usize,
) -> Result<(), SchemaError> {
    if reply.clarification_needed
        && reply.clarification.as_deref().map(str::trim).unwrap_or("").is_empty()
    {
        return Err(SchemaError::Invalid(
            "clarification_needed was set without clarification text".to_string(),
        ));
    }
    for number in &reply.target_numbers {
        if *number == 0 || *number > candidate_count {
            return Err(SchemaError::Invalid(format!(
                "target number {number} is out of range 1..={candidate_count}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        parse_reply, validate_checks, validate_disambiguation, DisambiguationReply, MatchesReply,
    };

    #[test]
    fn parses_fenced_json() {
        let reply: MatchesReply = parse_reply(
            "```json\n{\"checks\": [{\"guideline_number\": 1, \"score\": 9, \"rationale\": \"matches\"}]}\n```",
        )
        .expect("fenced reply");
        assert_eq!(reply.checks.len(), 1);
        assert_eq!(reply.checks[0].score, 9);
    }

    #[test]
    fn parses_bare_json() {
        let reply: MatchesReply =
            parse_reply("{\"checks\": []}").expect("bare reply");
        assert!(reply.checks.is_empty());
    }

    #[test]
    fn rejects_out_of_range_guideline_number() {
        let reply: MatchesReply = parse_reply(
            "{\"checks\": [{\"guideline_number\": 3, \"score\": 5, \"rationale\": \"no\"}]}",
        )
        .expect("parse");
        assert!(validate_checks(&reply, 2).is_err());
    }

    #[test]
    fn rejects_score_above_scale() {
        let reply: MatchesReply = parse_reply(
            "{\"checks\": [{\"guideline_number\": 1, \"score\": 11, \"rationale\": \"no\"}]}",
        )
        .expect("parse");
        assert!(validate_checks(&reply, 1).is_err());
    }

    #[test]
    fn clarification_without_text_is_invalid() {
        let reply: DisambiguationReply = parse_reply(
            "{\"clarification_needed\": true, \"target_numbers\": [1, 2]}",
        )
        .expect("parse");
        assert!(validate_disambiguation(&reply, 2).is_err());
    }
}
