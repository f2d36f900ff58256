//! Relationship indices consumed by the matching core.
//!
//! Both indices are built upstream (from declared guideline relationships and
//! the journey-graph builder) and read concurrently here; the matching core
//! never mutates them after construction.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::guideline::GuidelineId;
use crate::domain::journey::JourneyId;
use crate::errors::DomainError;

/// Guideline -> the guidelines it may need user clarification against.
///
/// A group with fewer than two targets is not a disambiguation group and is
/// rejected at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisambiguationIndex {
    groups: BTreeMap<GuidelineId, Vec<GuidelineId>>,
}

impl DisambiguationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(
        &mut self,
        source: GuidelineId,
        targets: Vec<GuidelineId>,
    ) -> Result<(), DomainError> {
        let mut seen = BTreeSet::new();
        let targets: Vec<GuidelineId> = targets
            .into_iter()
            .filter(|target| target != &source && seen.insert(target.clone()))
            .collect();
        if targets.len() < 2 {
            return Err(DomainError::InvalidDisambiguationGroup {
                source_id: source,
                target_count: targets.len(),
            });
        }
        self.groups.insert(source, targets);
        Ok(())
    }

    pub fn targets_of(&self, source: &GuidelineId) -> Option<&[GuidelineId]> {
        self.groups.get(source).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Guideline -> journeys it structurally depends on. Used only as prompt
/// context for size-based batches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyIndex {
    dependencies: BTreeMap<GuidelineId, Vec<JourneyId>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, guideline_id: GuidelineId, journeys: Vec<JourneyId>) {
        self.dependencies.insert(guideline_id, journeys);
    }

    pub fn journeys_for(&self, guideline_id: &GuidelineId) -> &[JourneyId] {
        self.dependencies.get(guideline_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::{DependencyIndex, DisambiguationIndex};
    use crate::domain::guideline::GuidelineId;
    use crate::domain::journey::JourneyId;
    use crate::errors::DomainError;

    #[test]
    fn single_target_group_is_rejected() {
        let mut index = DisambiguationIndex::new();
        let result = index
            .insert_group(GuidelineId::new("g-1"), vec![GuidelineId::new("g-2")]);

        assert!(matches!(
            result,
            Err(DomainError::InvalidDisambiguationGroup { target_count: 1, .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn self_reference_does_not_count_as_target() {
        let mut index = DisambiguationIndex::new();
        let result = index.insert_group(
            GuidelineId::new("g-1"),
            vec![GuidelineId::new("g-1"), GuidelineId::new("g-2")],
        );

        assert!(result.is_err());
    }

    #[test]
    fn rejection_error_names_the_source() {
        let mut index = DisambiguationIndex::new();
        let error = index
            .insert_group(GuidelineId::new("g-1"), vec![GuidelineId::new("g-2")])
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "disambiguation group for g-1 needs at least two targets, got 1"
        );
    }

    #[test]
    fn duplicate_targets_collapse_to_one() {
        let mut index = DisambiguationIndex::new();
        index
            .insert_group(
                GuidelineId::new("g-1"),
                vec![
                    GuidelineId::new("g-2"),
                    GuidelineId::new("g-3"),
                    GuidelineId::new("g-2"),
                ],
            )
            .unwrap();

        assert_eq!(
            index.targets_of(&GuidelineId::new("g-1")),
            Some(&[GuidelineId::new("g-2"), GuidelineId::new("g-3")][..])
        );
    }

    #[test]
    fn repeated_single_target_is_rejected() {
        let mut index = DisambiguationIndex::new();
        let result = index.insert_group(
            GuidelineId::new("g-1"),
            vec![GuidelineId::new("g-2"), GuidelineId::new("g-2")],
        );

        assert!(matches!(
            result,
            Err(DomainError::InvalidDisambiguationGroup { target_count: 1, .. })
        ));
    }

    #[test]
    fn valid_group_is_queryable() {
        let mut index = DisambiguationIndex::new();
        index
            .insert_group(
                GuidelineId::new("g-1"),
                vec![GuidelineId::new("g-2"), GuidelineId::new("g-3")],
            )
            .unwrap();

        assert_eq!(index.targets_of(&GuidelineId::new("g-1")).map(<[_]>::len), Some(2));
        assert!(index.targets_of(&GuidelineId::new("g-2")).is_none());
    }

    #[test]
    fn dependency_index_defaults_to_empty() {
        let mut index = DependencyIndex::new();
        index.insert(GuidelineId::new("g-1"), vec![JourneyId::new("j-1")]);

        assert_eq!(index.journeys_for(&GuidelineId::new("g-1")).len(), 1);
        assert!(index.journeys_for(&GuidelineId::new("g-2")).is_empty());
    }
}
