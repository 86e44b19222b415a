//! Entity and relation extraction
//!
//! Extractors are pure: they turn one input unit (a text chunk or a schema
//! description) into candidates. Candidates reference the graph only through
//! names and types; ids are assigned later by the merge engine.

pub mod entity;
pub mod relation;
pub mod schema;

pub use entity::{EntityExtractor, ExtractorConfig, TypeRule};
pub use relation::{RelationExtractor, RelationExtractorConfig, RelationRule};
pub use schema::{extract_schema, ColumnSchema, ForeignKey, SchemaDescription, SchemaExtraction, TableSchema};

use crate::graph::types::content_id;
use crate::graph::{EntityType, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;
use thiserror::Error;

/// Extraction errors. Always scoped to one input unit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Unit {0} is empty")]
    EmptyUnit(String),

    #[error("Unit {source_id} is {size} bytes, limit is {limit}")]
    UnitTooLarge {
        source_id: String,
        size: usize,
        limit: usize,
    },

    #[error("Malformed segment in {source_id}: {reason}")]
    MalformedSegment { source_id: String, reason: String },

    #[error("Model extraction failed for {source_id}: {reason}")]
    Model { source_id: String, reason: String },

    #[error("Invalid extraction pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl ExtractionError {
    /// Source unit the error is scoped to, if any
    pub fn source_id(&self) -> Option<&str> {
        match self {
            ExtractionError::EmptyUnit(id) => Some(id.as_str()),
            ExtractionError::UnitTooLarge { source_id, .. }
            | ExtractionError::MalformedSegment { source_id, .. }
            | ExtractionError::Model { source_id, .. } => Some(source_id.as_str()),
            ExtractionError::InvalidPattern { .. } => None,
        }
    }
}

/// Ratio of U+FFFD replacement characters above which a unit is malformed
const MAX_REPLACEMENT_RATIO: f64 = 0.1;

/// Reject units that are empty, oversized or mostly undecodable
pub fn validate_unit(unit: &SourceText, max_bytes: usize) -> ExtractionResult<()> {
    if unit.text.trim().is_empty() {
        return Err(ExtractionError::EmptyUnit(unit.id.clone()));
    }
    if unit.text.len() > max_bytes {
        return Err(ExtractionError::UnitTooLarge {
            source_id: unit.id.clone(),
            size: unit.text.len(),
            limit: max_bytes,
        });
    }
    let total = unit.text.chars().count();
    let replaced = unit.text.chars().filter(|&c| c == '\u{FFFD}' || c == '\0').count();
    if replaced as f64 / total as f64 > MAX_REPLACEMENT_RATIO {
        return Err(ExtractionError::MalformedSegment {
            source_id: unit.id.clone(),
            reason: format!("{} of {} characters are undecodable", replaced, total),
        });
    }
    Ok(())
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// An extractor's proposed entity prior to merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub name: String,
    pub entity_type: EntityType,
    /// Byte range of the mention in the source text (empty for schema input)
    pub span: Range<usize>,
    pub confidence: f64,
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
}

impl CandidateEntity {
    pub fn new(name: impl Into<String>, entity_type: EntityType, span: Range<usize>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            entity_type,
            span,
            confidence,
            description: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

/// An extractor's proposed relation. `head` and `tail` index into the
/// candidate entity list that was supplied to the relation extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRelation {
    pub head: usize,
    pub tail: usize,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub description: Option<String>,
}

/// Optional extraction context
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub source_id: Option<String>,
    /// When set, only candidates of these types are returned
    pub allowed_types: Option<BTreeSet<EntityType>>,
}

impl ExtractionContext {
    pub fn for_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            allowed_types: None,
        }
    }

    pub fn allows(&self, entity_type: &EntityType) -> bool {
        self.allowed_types
            .as_ref()
            .map_or(true, |types| types.contains(entity_type))
    }
}

/// One pre-cleaned text input unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceText {
    pub id: String,
    pub text: String,
}

impl SourceText {
    /// Text unit with an id derived from its content
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: content_id("doc", &text),
            text,
        }
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

impl From<&str> for SourceText {
    fn from(text: &str) -> Self {
        SourceText::new(text)
    }
}

/// Everything extracted from one input unit, ready for merging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitExtraction {
    pub source_id: String,
    pub entities: Vec<CandidateEntity>,
    pub relations: Vec<CandidateRelation>,
}
