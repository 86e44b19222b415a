//! Injectable extraction capability
//!
//! Builders never call an extractor directly. They hold an
//! [`ExtractionBackend`], which is either the local rule-based pipeline or a
//! language model prompted for JSON.

use crate::config::ExtractionSettings;
use crate::extract::{
    validate_unit, CandidateEntity, CandidateRelation, EntityExtractor, ExtractionContext, ExtractionError,
    ExtractionResult, RelationExtractor, SourceText, UnitExtraction,
};
use crate::extract::entity::heuristic_confidence;
use crate::graph::{normalize_name, EntityType, RelationType};
use crate::llm::{extract_fenced, LanguageModel};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, unit: &SourceText) -> ExtractionResult<UnitExtraction>;
}

/// Entity extraction followed by relation extraction over the same unit
pub struct RuleBasedBackend {
    entities: EntityExtractor,
    relations: RelationExtractor,
    max_unit_bytes: usize,
}

impl RuleBasedBackend {
    pub fn new(settings: &ExtractionSettings) -> ExtractionResult<Self> {
        Ok(Self {
            entities: EntityExtractor::new(settings.entity.clone())?,
            relations: RelationExtractor::new(settings.relation.clone())?,
            max_unit_bytes: settings.max_unit_bytes,
        })
    }

    /// Synchronous form used from the rayon pool
    pub fn extract_unit(&self, unit: &SourceText) -> ExtractionResult<UnitExtraction> {
        validate_unit(unit, self.max_unit_bytes)?;
        let context = ExtractionContext::for_source(unit.id.clone());
        let entities = self.entities.extract(&unit.text, Some(&context));
        let relations = self.relations.extract(&unit.text, &entities);
        debug!(
            "Unit {}: {} entities, {} relations",
            unit.id,
            entities.len(),
            relations.len()
        );
        Ok(UnitExtraction {
            source_id: unit.id.clone(),
            entities,
            relations,
        })
    }
}

#[async_trait]
impl ExtractionBackend for RuleBasedBackend {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn extract(&self, unit: &SourceText) -> ExtractionResult<UnitExtraction> {
        self.extract_unit(unit)
    }
}

const EXTRACTION_PROMPT: &str = r#"Extract a knowledge graph from the text below.
Respond with JSON only, in this shape:
{"entities": [{"name": "...", "type": "...", "description": "...", "confidence": 0.9}],
 "relations": [{"head": "<entity name>", "tail": "<entity name>", "type": "...", "description": "...", "confidence": 0.8}]}
Relation heads and tails must be names from the entities list.

Text:
"#;

const DEFAULT_RELATION_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct ModelExtraction {
    #[serde(default)]
    entities: Vec<ModelEntity>,
    #[serde(default)]
    relations: Vec<ModelRelation>,
}

#[derive(Debug, Deserialize)]
struct ModelEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelRelation {
    head: String,
    tail: String,
    #[serde(rename = "type")]
    relation_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Prompts a language model and parses its JSON answer
pub struct ModelBackedBackend {
    model: Arc<dyn LanguageModel>,
    max_unit_bytes: usize,
}

impl ModelBackedBackend {
    pub fn new(model: Arc<dyn LanguageModel>, max_unit_bytes: usize) -> Self {
        Self { model, max_unit_bytes }
    }

    fn parse(&self, unit: &SourceText, response: &str) -> ExtractionResult<UnitExtraction> {
        let parsed: ModelExtraction =
            serde_json::from_str(extract_fenced(response)).map_err(|e| ExtractionError::Model {
                source_id: unit.id.clone(),
                reason: format!("unparseable response: {}", e),
            })?;

        let mut entities: Vec<CandidateEntity> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for raw in parsed.entities {
            let Ok(entity_type) = EntityType::new(&raw.entity_type) else {
                debug!("Unit {}: dropping {:?} with invalid type {:?}", unit.id, raw.name, raw.entity_type);
                continue;
            };
            let key = normalize_name(&raw.name);
            if key.is_empty() || by_name.contains_key(&key) {
                continue;
            }
            let span = unit
                .text
                .find(raw.name.trim())
                .map_or(0..0, |start| start..start + raw.name.trim().len());
            let confidence = raw.confidence.unwrap_or_else(|| heuristic_confidence(&raw.name));
            let mut candidate = CandidateEntity::new(raw.name.trim(), entity_type, span, confidence);
            if let Some(description) = raw.description.filter(|d| !d.trim().is_empty()) {
                candidate = candidate.with_description(description);
            }
            by_name.insert(key, entities.len());
            entities.push(candidate);
        }

        let mut relations = Vec::new();
        for raw in parsed.relations {
            let head = by_name.get(&normalize_name(&raw.head));
            let tail = by_name.get(&normalize_name(&raw.tail));
            let (Some(&head), Some(&tail), Ok(relation_type)) = (head, tail, RelationType::new(&raw.relation_type))
            else {
                debug!("Unit {}: dropping relation {} -> {}", unit.id, raw.head, raw.tail);
                continue;
            };
            relations.push(CandidateRelation {
                head,
                tail,
                relation_type,
                confidence: raw.confidence.unwrap_or(DEFAULT_RELATION_CONFIDENCE),
                description: raw.description,
            });
        }

        Ok(UnitExtraction {
            source_id: unit.id.clone(),
            entities,
            relations,
        })
    }
}

#[async_trait]
impl ExtractionBackend for ModelBackedBackend {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn extract(&self, unit: &SourceText) -> ExtractionResult<UnitExtraction> {
        validate_unit(unit, self.max_unit_bytes)?;
        let prompt = format!("{}{}", EXTRACTION_PROMPT, unit.text);
        let response = self.model.complete(&prompt).await.map_err(|e| ExtractionError::Model {
            source_id: unit.id.clone(),
            reason: e.to_string(),
        })?;
        self.parse(unit, &response)
    }
}
