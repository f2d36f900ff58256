//! Journeys: multi-step conversation state machines.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::guideline::GuidelineId;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JourneyId(pub String);

impl JourneyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for JourneyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JourneyNodeId(pub String);

impl JourneyNodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for JourneyNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of a journey graph. Edges are the `follow_ups` adjacency list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyNode {
    pub id: JourneyNodeId,
    pub guideline_id: GuidelineId,
    pub follow_ups: Vec<JourneyNodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journey {
    pub id: JourneyId,
    pub title: String,
    pub entry_guideline_ids: Vec<GuidelineId>,
    pub nodes: BTreeMap<JourneyNodeId, JourneyNode>,
}

impl Journey {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: JourneyId::new(id),
            title: title.into(),
            entry_guideline_ids: Vec::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, guideline_id: GuidelineId) -> Self {
        self.entry_guideline_ids.push(guideline_id);
        self
    }

    pub fn with_node(mut self, node: JourneyNode) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn node_for_guideline(&self, guideline_id: &GuidelineId) -> Option<&JourneyNode> {
        self.nodes.values().find(|node| &node.guideline_id == guideline_id)
    }
}

/// Ordered list of visited step guidelines. `None` entries are gaps: turns
/// where the journey advanced without a recorded step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyPath(pub Vec<Option<GuidelineId>>);

impl JourneyPath {
    pub fn visited(&self) -> impl Iterator<Item = &GuidelineId> {
        self.0.iter().flatten()
    }

    pub fn last_visited(&self) -> Option<&GuidelineId> {
        self.0.iter().rev().flatten().next()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// A journey eligible to continue executing this turn, with the path taken
/// so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJourney {
    pub journey: Journey,
    pub path: JourneyPath,
}

#[cfg(test)]
mod tests {
    use super::{Journey, JourneyNode, JourneyNodeId, JourneyPath};
    use crate::domain::guideline::GuidelineId;

    fn node(id: &str, guideline: &str, follow_ups: &[&str]) -> JourneyNode {
        JourneyNode {
            id: JourneyNodeId::new(id),
            guideline_id: GuidelineId::new(guideline),
            follow_ups: follow_ups.iter().copied().map(JourneyNodeId::new).collect(),
        }
    }

    #[test]
    fn node_lookup_by_guideline() {
        let journey = Journey::new("j-refund", "Refund flow")
            .with_node(node("n-1", "g-ask-order", &["n-2"]))
            .with_node(node("n-2", "g-confirm", &[]));

        let found = journey.node_for_guideline(&GuidelineId::new("g-confirm"));
        assert_eq!(found.map(|n| n.id.clone()), Some(JourneyNodeId::new("n-2")));
        assert!(journey.node_for_guideline(&GuidelineId::new("g-other")).is_none());
    }

    #[test]
    fn path_skips_gaps() {
        let path = JourneyPath(vec![
            Some(GuidelineId::new("g-1")),
            None,
            Some(GuidelineId::new("g-3")),
        ]);

        assert_eq!(path.visited().count(), 2);
        assert_eq!(path.last_visited(), Some(&GuidelineId::new("g-3")));
        assert_eq!(path.len(), 3);
    }
}
