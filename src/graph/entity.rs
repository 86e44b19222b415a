//! Entity records and the entity merge rule

use super::types::{now_millis, EntityId, EntityType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// A typed, named node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
    pub description: Option<String>,
    /// Originating document or table identifiers
    pub source_ids: BTreeSet<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Free-form attributes (column data types, nullability, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity {
    /// Create an entity whose id is derived from its normalized name and type
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        let name = name.into();
        let id = EntityId::derive(&name, &entity_type);
        Self::with_id(id, name, entity_type)
    }

    /// Create an entity with an explicitly supplied id
    pub fn with_id(id: EntityId, name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = now_millis();
        Self {
            id,
            name: name.into(),
            entity_type,
            description: None,
            source_ids: BTreeSet::new(),
            confidence: 1.0,
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
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

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Merge another observation of the same entity into this one.
    ///
    /// The rule is commutative and associative: confidence is the max, text
    /// fields come from the more confident side (ties prefer a present value,
    /// then the lexicographically smaller one) and source ids are unioned.
    /// Returns the number of tie-break resolutions performed.
    pub fn merge_from(&mut self, other: &Entity) -> usize {
        let mut conflicts = 0;
        let preference = compare_confidence(self.confidence, other.confidence);

        let (name, name_conflict) = pick_text(Some(&self.name), Some(&other.name), preference);
        if let Some(name) = name {
            self.name = name;
        }
        conflicts += name_conflict as usize;

        let (description, desc_conflict) =
            pick_text(self.description.as_ref(), other.description.as_ref(), preference);
        self.description = description;
        conflicts += desc_conflict as usize;

        for (key, value) in &other.attributes {
            match self.attributes.get(key) {
                None => {
                    self.attributes.insert(key.clone(), value.clone());
                }
                Some(current) if current != value => {
                    let (picked, _) = pick_text(Some(current), Some(value), preference);
                    if let Some(picked) = picked {
                        self.attributes.insert(key.clone(), picked);
                    }
                    conflicts += 1;
                }
                Some(_) => {}
            }
        }

        self.source_ids.extend(other.source_ids.iter().cloned());
        self.confidence = self.confidence.max(other.confidence);
        self.created_at = self.created_at.min(other.created_at);
        self.updated_at = self.updated_at.max(other.updated_at);
        conflicts
    }
}

/// Clamp a confidence into [0, 1], mapping NaN to 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `Greater` when the left side is more confident
pub(crate) fn compare_confidence(left: f64, right: f64) -> Ordering {
    left.partial_cmp(&right).unwrap_or(Ordering::Equal)
}

/// Choose between two optional text values given which side is more
/// confident. The boolean reports whether a tie-break was needed.
pub(crate) fn pick_text(
    left: Option<&String>,
    right: Option<&String>,
    preference: Ordering,
) -> (Option<String>, bool) {
    match (left, right) {
        (None, None) => (None, false),
        (Some(l), None) => (Some(l.clone()), false),
        (None, Some(r)) => (Some(r.clone()), false),
        (Some(l), Some(r)) if l == r => (Some(l.clone()), false),
        (Some(l), Some(r)) => match preference {
            Ordering::Greater => (Some(l.clone()), false),
            Ordering::Less => (Some(r.clone()), false),
            Ordering::Equal => (Some(l.min(r).clone()), true),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city(name: &str) -> Entity {
        Entity::new(name, EntityType::new("city").unwrap())
    }

    #[test]
    fn test_merge_keeps_higher_confidence_description() {
        let mut a = city("Beijing")
            .with_description("a city")
            .with_confidence(0.6)
            .with_source("doc-1");
        let b = city("Beijing")
            .with_description("capital of China")
            .with_confidence(0.9)
            .with_source("doc-2");

        a.merge_from(&b);
        assert_eq!(a.description.as_deref(), Some("capital of China"));
        assert_eq!(a.confidence, 0.9);
        assert_eq!(a.source_ids.len(), 2);
    }

    #[test]
    fn test_merge_is_commutative_on_ties() {
        let x = city("Beijing").with_description("alpha").with_confidence(0.5);
        let y = city("beijing").with_description("beta").with_confidence(0.5);

        let mut xy = x.clone();
        let conflicts = xy.merge_from(&y);
        let mut yx = y.clone();
        yx.merge_from(&x);

        assert!(conflicts >= 1);
        assert_eq!(xy.name, yx.name);
        assert_eq!(xy.description, yx.description);
        assert_eq!(xy.description.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_merge_source_ids_are_a_set() {
        let mut a = city("Beijing").with_source("doc-1");
        let b = city("Beijing").with_source("doc-1");
        a.merge_from(&b);
        assert_eq!(a.source_ids.len(), 1);
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }
}
