//! Guidelines: condition/action rules governing agent behavior.
//!
//! Guidelines are read fresh each turn from an external store. The matching
//! core never mutates them; the pre-computed metadata flags are written by
//! the external evaluation pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::journey::{JourneyId, JourneyNodeId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuidelineId(pub String);

impl GuidelineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for GuidelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The condition/action pair of a guideline. An absent action means the
/// guideline is a pure observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineContent {
    pub condition: String,
    pub action: Option<String>,
}

/// A validated guideline tag.
///
/// Journey-entry markers are an explicit variant rather than a string prefix,
/// so nothing downstream ever parses tag text to discover what kind of tag it
/// is holding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuidelineTag {
    /// This guideline is an entry condition for the given journey.
    JourneyEntry(JourneyId),
    /// A free-form label, e.g. for routing to a non-default strategy.
    Label(String),
}

impl GuidelineTag {
    /// Build a label tag, rejecting text that smells like prefix encoding.
    pub fn label(text: impl Into<String>) -> Result<Self, DomainError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(DomainError::InvalidTag("label must not be empty".to_string()));
        }
        if text.contains(':') {
            return Err(DomainError::InvalidTag(format!(
                "label `{text}` must not embed `:`-separated encodings; use a typed variant"
            )));
        }
        Ok(Self::Label(text))
    }
}

/// Reference from a guideline to the journey step it implements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyNodeRef {
    pub journey_id: JourneyId,
    pub node_id: JourneyNodeId,
}

/// Flags pre-computed by the external evaluation pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineMetadata {
    /// Set when this guideline is a step inside a specific journey rather
    /// than an independent rule.
    pub journey_node: Option<JourneyNodeRef>,
    /// Re-evaluate every turn even if applied before.
    pub continuous: bool,
    /// The action requires waiting on data from the customer.
    pub customer_dependent: bool,
    /// Open extension map owned by the evaluation pipeline.
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guideline {
    pub id: GuidelineId,
    pub content: GuidelineContent,
    pub tags: Vec<GuidelineTag>,
    pub metadata: GuidelineMetadata,
}

impl Guideline {
    pub fn observational(id: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            id: GuidelineId::new(id),
            content: GuidelineContent { condition: condition.into(), action: None },
            tags: Vec::new(),
            metadata: GuidelineMetadata::default(),
        }
    }

    pub fn actionable(
        id: impl Into<String>,
        condition: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: GuidelineId::new(id),
            content: GuidelineContent { condition: condition.into(), action: Some(action.into()) },
            tags: Vec::new(),
            metadata: GuidelineMetadata::default(),
        }
    }

    pub fn with_tag(mut self, tag: GuidelineTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_metadata(mut self, metadata: GuidelineMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_observational(&self) -> bool {
        self.content.action.is_none()
    }

    /// The journey this guideline is an entry condition for, if any.
    pub fn journey_entry(&self) -> Option<&JourneyId> {
        self.tags.iter().find_map(|tag| match tag {
            GuidelineTag::JourneyEntry(journey_id) => Some(journey_id),
            GuidelineTag::Label(_) => None,
        })
    }

    pub fn journey_node(&self) -> Option<&JourneyNodeRef> {
        self.metadata.journey_node.as_ref()
    }
}
