//! Registry of known relation types, used for display categorization.
//!
//! Relation types stay open strings. The registry only decides which display
//! bucket a type falls into; anything unknown renders as [`OTHER_BUCKET`].

use super::types::RelationType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Display bucket for relation types the registry does not know
pub const OTHER_BUCKET: &str = "other";

const BUILTIN_TYPES: &[&str] = &[
    "capital_of",
    "located_in",
    "municipality_of",
    "part_of",
    "belongs_to",
    "contains",
    "has_column",
    "references",
    "works_for",
    "founded_by",
    "related_to",
    "similar_to",
    "describes",
    "mentions",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationTypeRegistry {
    known: BTreeSet<String>,
}

impl Default for RelationTypeRegistry {
    fn default() -> Self {
        Self {
            known: BUILTIN_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RelationTypeRegistry {
    /// A registry with no known types
    pub fn empty() -> Self {
        Self {
            known: BTreeSet::new(),
        }
    }

    pub fn register(&mut self, relation_type: &RelationType) -> bool {
        self.known.insert(relation_type.as_str().to_string())
    }

    pub fn is_known(&self, relation_type: &RelationType) -> bool {
        self.known.contains(relation_type.as_str())
    }

    /// Display bucket for a relation type
    pub fn display_bucket<'a>(&self, relation_type: &'a RelationType) -> &'a str {
        if self.is_known(relation_type) {
            relation_type.as_str()
        } else {
            OTHER_BUCKET
        }
    }

    pub fn known_types(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_types_fall_into_other() {
        let mut registry = RelationTypeRegistry::default();
        let known = RelationType::new("capital_of").unwrap();
        let custom = RelationType::new("twinned_with").unwrap();

        assert_eq!(registry.display_bucket(&known), "capital_of");
        assert_eq!(registry.display_bucket(&custom), OTHER_BUCKET);

        registry.register(&custom);
        assert_eq!(registry.display_bucket(&custom), "twinned_with");
    }
}
