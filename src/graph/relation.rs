//! Relation records (directed, typed edges between entities)

use super::entity::{clamp_confidence, compare_confidence, pick_text};
use super::types::{now_millis, EntityId, RelationId, RelationKey, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_weight() -> f64 {
    1.0
}

/// A directed, typed edge connecting two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub head: EntityId,
    pub tail: EntityId,
    pub relation_type: RelationType,
    /// Observation weight, summed when the same triple is seen again
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub description: Option<String>,
    pub confidence: f64,
    pub source_ids: BTreeSet<String>,
    /// Self loops are only accepted when this flag is set
    #[serde(default)]
    pub allow_self_loop: bool,
    pub created_at: i64,
}

impl Relation {
    pub fn new(head: EntityId, tail: EntityId, relation_type: RelationType) -> Self {
        let key = RelationKey {
            head,
            tail,
            relation_type,
        };
        let id = RelationId::derive(&key);
        Self {
            id,
            head: key.head,
            tail: key.tail,
            relation_type: key.relation_type,
            weight: default_weight(),
            description: None,
            confidence: 1.0,
            source_ids: BTreeSet::new(),
            allow_self_loop: false,
            created_at: now_millis(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_ids.insert(source_id.into());
        self
    }

    pub fn allowing_self_loop(mut self) -> Self {
        self.allow_self_loop = true;
        self
    }

    pub fn key(&self) -> RelationKey {
        RelationKey {
            head: self.head.clone(),
            tail: self.tail.clone(),
            relation_type: self.relation_type.clone(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.head == self.tail
    }

    /// Fold a repeated observation of the same triple into this relation.
    /// Returns the number of tie-break resolutions performed.
    pub fn merge_from(&mut self, other: &Relation) -> usize {
        let preference = compare_confidence(self.confidence, other.confidence);
        let (description, conflict) =
            pick_text(self.description.as_ref(), other.description.as_ref(), preference);
        self.description = description;

        self.weight += other.weight;
        self.confidence = self.confidence.max(other.confidence);
        self.source_ids.extend(other.source_ids.iter().cloned());
        self.allow_self_loop |= other.allow_self_loop;
        self.created_at = self.created_at.min(other.created_at);
        conflict as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(head: &str, tail: &str) -> Relation {
        Relation::new(
            EntityId::new(head),
            EntityId::new(tail),
            RelationType::new("capital_of").unwrap(),
        )
    }

    #[test]
    fn test_merge_sums_weight_and_unions_sources() {
        let mut a = rel("beijing", "china").with_source("doc-1");
        let b = rel("beijing", "china").with_source("doc-1").with_source("doc-2");
        a.merge_from(&b);
        assert_eq!(a.weight, 2.0);
        assert_eq!(a.source_ids.len(), 2);
    }

    #[test]
    fn test_id_matches_key() {
        let r = rel("a", "b");
        assert_eq!(r.id, RelationId::derive(&r.key()));
        assert!(!r.is_self_loop());
        assert!(rel("a", "a").is_self_loop());
    }
}
