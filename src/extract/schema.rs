//! Deterministic extraction from relational schema descriptions
//!
//! Tables become `table` entities, columns become `column` entities named
//! `table.column` with a `has_column` relation from their table, and each
//! foreign key becomes a `references` relation between column entities.

use super::{CandidateEntity, CandidateRelation, ExtractionError, UnitExtraction};
use crate::graph::types::content_id;
use crate::graph::{normalize_name, EntityType, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Schema description as produced by an external introspection component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(default, rename = "type")]
    pub data_type: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

/// `table.column` references `references_table.references_column`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

impl SchemaDescription {
    /// Stable source id derived from the schema content
    pub fn source_id(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        content_id("schema", &canonical)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaExtraction {
    pub unit: UnitExtraction,
    /// Malformed segments that were skipped
    pub skipped: Vec<ExtractionError>,
}

/// Extract entities and relations from a schema description, in input order
pub fn extract_schema(schema: &SchemaDescription, source_id: &str) -> SchemaExtraction {
    let mut out = SchemaExtraction {
        unit: UnitExtraction {
            source_id: source_id.to_string(),
            ..UnitExtraction::default()
        },
        skipped: Vec::new(),
    };
    let (Ok(database_t), Ok(table_t), Ok(column_t)) = (
        EntityType::new("database"),
        EntityType::new("table"),
        EntityType::new("column"),
    ) else {
        return out;
    };
    let (Ok(contains), Ok(has_column), Ok(references)) = (
        RelationType::new("contains"),
        RelationType::new("has_column"),
        RelationType::new("references"),
    ) else {
        return out;
    };

    let entities = &mut out.unit.entities;
    let relations = &mut out.unit.relations;

    let database = schema
        .database_name
        .as_ref()
        .filter(|n| !n.trim().is_empty())
        .map(|name| {
            entities.push(
                CandidateEntity::new(name.trim(), database_t.clone(), 0..0, 1.0)
                    .with_description(format!("Database: {}", name.trim())),
            );
            entities.len() - 1
        });

    // normalized "table.column" -> entity index
    let mut columns: HashMap<String, usize> = HashMap::new();
    let mut tables: Vec<(usize, &TableSchema)> = Vec::new();

    for table in &schema.tables {
        let table_name = table.name.trim();
        if table_name.is_empty() {
            out.skipped.push(malformed(source_id, "table without a name"));
            continue;
        }
        let description = table
            .comment
            .clone()
            .unwrap_or_else(|| format!("Table: {}", table_name));
        entities.push(
            CandidateEntity::new(table_name, table_t.clone(), 0..0, 1.0)
                .with_description(description)
                .with_attribute("column_count", table.columns.len().to_string()),
        );
        let table_idx = entities.len() - 1;
        tables.push((table_idx, table));

        if let Some(db_idx) = database {
            relations.push(schema_relation(db_idx, table_idx, &contains));
        }

        for column in &table.columns {
            let column_name = column.name.trim();
            if column_name.is_empty() {
                out.skipped
                    .push(malformed(source_id, &format!("column without a name in {}", table_name)));
                continue;
            }
            let full_name = format!("{}.{}", table_name, column_name);
            let key = normalize_name(&full_name);
            if columns.contains_key(&key) {
                continue;
            }
            let mut candidate = CandidateEntity::new(full_name, column_t.clone(), 0..0, 1.0)
                .with_description(
                    column
                        .comment
                        .clone()
                        .unwrap_or_else(|| format!("Column: {}", column_name)),
                )
                .with_attribute("table", table_name)
                .with_attribute("nullable", column.nullable.to_string())
                .with_attribute("primary_key", column.primary_key.to_string());
            if let Some(data_type) = &column.data_type {
                candidate = candidate.with_attribute("data_type", data_type.clone());
            }
            entities.push(candidate);
            let column_idx = entities.len() - 1;
            columns.insert(key, column_idx);
            relations.push(schema_relation(table_idx, column_idx, &has_column));
        }
    }

    for (_, table) in &tables {
        for fk in &table.foreign_keys {
            let from = normalize_name(&format!("{}.{}", table.name.trim(), fk.column.trim()));
            let to = normalize_name(&format!(
                "{}.{}",
                fk.references_table.trim(),
                fk.references_column.trim()
            ));
            match (columns.get(&from), columns.get(&to)) {
                (Some(&head), Some(&tail)) if head != tail => {
                    relations.push(schema_relation(head, tail, &references));
                }
                _ => {
                    let reason = format!("foreign key {} -> {} names an unknown column", from, to);
                    warn!(source = source_id, "{}", reason);
                    out.skipped.push(malformed(source_id, &reason));
                }
            }
        }
    }

    out
}

fn schema_relation(head: usize, tail: usize, relation_type: &RelationType) -> CandidateRelation {
    CandidateRelation {
        head,
        tail,
        relation_type: relation_type.clone(),
        confidence: 1.0,
        description: None,
    }
}

fn malformed(source_id: &str, reason: &str) -> ExtractionError {
    ExtractionError::MalformedSegment {
        source_id: source_id.to_string(),
        reason: reason.to_string(),
    }
}
