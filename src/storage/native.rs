//! Pattern queries for the graph-database backend
//!
//! Two shapes are understood:
//!
//! ```text
//! MATCH (n:city {name: 'Beijing'}) RETURN n LIMIT 5
//! MATCH (a:city)-[r:capital_of]->(b) RETURN a, r, b
//! ```
//!
//! Labels and the name property are optional. Keywords are case-insensitive.

use super::{StorageError, StorageResult};
use crate::graph::{normalize_name, Entity, EntityType, KnowledgeGraph, Relation, RelationType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const NODE: &str = r"\(\s*(\w+)\s*(?::\s*(\w+))?\s*(?:\{\s*name\s*:\s*'([^']*)'\s*\})?\s*\)";
const TAIL: &str = r"\s+RETURN\s+(.+?)(?:\s+LIMIT\s+(\d+))?\s*;?\s*$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeQueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl NativeQueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub var: String,
    pub entity_type: Option<EntityType>,
    pub name: Option<String>,
}

impl NodePattern {
    fn matches(&self, entity: &Entity) -> bool {
        self.entity_type.as_ref().map_or(true, |t| *t == entity.entity_type)
            && self
                .name
                .as_ref()
                .map_or(true, |n| normalize_name(n) == normalize_name(&entity.name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationPattern {
    pub var: Option<String>,
    pub relation_type: Option<RelationType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternQuery {
    Nodes {
        node: NodePattern,
        returns: Vec<String>,
        limit: Option<usize>,
    },
    Path {
        head: NodePattern,
        relation: RelationPattern,
        tail: NodePattern,
        returns: Vec<String>,
        limit: Option<usize>,
    },
}

impl PatternQuery {
    pub fn parse(query: &str) -> StorageResult<Self> {
        let nodes = compile(&format!(r"(?i)^\s*MATCH\s+{}{}", NODE, TAIL))?;
        let path = compile(&format!(
            r"(?i)^\s*MATCH\s+{}\s*-\[\s*(\w+)?\s*(?::\s*(\w+))?\s*\]->\s*{}{}",
            NODE, NODE, TAIL
        ))?;

        if let Some(caps) = path.captures(query) {
            let head = node_pattern(&caps, 1)?;
            let relation = RelationPattern {
                var: caps.get(4).map(|m| m.as_str().to_string()),
                relation_type: caps
                    .get(5)
                    .map(|m| RelationType::new(m.as_str()))
                    .transpose()
                    .map_err(|e| StorageError::Query(e.to_string()))?,
            };
            let tail = node_pattern(&caps, 6)?;
            let mut declared = vec![head.var.as_str(), tail.var.as_str()];
            declared.extend(relation.var.as_deref());
            let returns = return_list(&caps[9], &declared)?;
            let limit = parse_limit(caps.get(10).map(|m| m.as_str()))?;
            return Ok(PatternQuery::Path {
                head,
                relation,
                tail,
                returns,
                limit,
            });
        }

        if let Some(caps) = nodes.captures(query) {
            let node = node_pattern(&caps, 1)?;
            let returns = return_list(&caps[4], &[node.var.as_str()])?;
            let limit = parse_limit(caps.get(5).map(|m| m.as_str()))?;
            return Ok(PatternQuery::Nodes { node, returns, limit });
        }

        Err(StorageError::Query(format!("unsupported query: {}", query.trim())))
    }

    /// Evaluate against one graph. Rows are ordered by entity id for node
    /// patterns and by relation id for path patterns.
    pub fn execute(&self, graph: &KnowledgeGraph) -> StorageResult<NativeQueryResult> {
        match self {
            PatternQuery::Nodes { node, returns, limit } => {
                let mut matched: Vec<&Entity> = graph.entities().filter(|e| node.matches(e)).collect();
                matched.sort_by(|a, b| a.id.cmp(&b.id));
                matched.truncate(limit.unwrap_or(usize::MAX));
                let rows = matched
                    .into_iter()
                    .map(|e| Ok(vec![to_value(e)?; returns.len()]))
                    .collect::<StorageResult<Vec<_>>>()?;
                Ok(NativeQueryResult {
                    columns: returns.clone(),
                    rows,
                })
            }
            PatternQuery::Path {
                head,
                relation,
                tail,
                returns,
                limit,
            } => {
                let mut matched: Vec<(&Entity, &Relation, &Entity)> = graph
                    .relations()
                    .filter(|r| relation.relation_type.as_ref().map_or(true, |t| *t == r.relation_type))
                    .filter_map(|r| Some((graph.entity(&r.head)?, r, graph.entity(&r.tail)?)))
                    .filter(|(h, _, t)| head.matches(h) && tail.matches(t))
                    .collect();
                matched.sort_by(|a, b| a.1.id.cmp(&b.1.id));
                matched.truncate(limit.unwrap_or(usize::MAX));

                let mut rows = Vec::with_capacity(matched.len());
                for (h, r, t) in matched {
                    let mut row = Vec::with_capacity(returns.len());
                    for column in returns {
                        let value = if *column == head.var {
                            to_value(h)?
                        } else if *column == tail.var {
                            to_value(t)?
                        } else {
                            to_value(r)?
                        };
                        row.push(value);
                    }
                    rows.push(row);
                }
                Ok(NativeQueryResult {
                    columns: returns.clone(),
                    rows,
                })
            }
        }
    }
}

fn to_value<T: Serialize>(record: &T) -> StorageResult<serde_json::Value> {
    serde_json::to_value(record).map_err(|e| StorageError::Query(format!("unencodable row: {}", e)))
}

fn compile(pattern: &str) -> StorageResult<Regex> {
    Regex::new(pattern).map_err(|e| StorageError::Query(e.to_string()))
}

fn node_pattern(caps: &regex::Captures<'_>, first: usize) -> StorageResult<NodePattern> {
    Ok(NodePattern {
        var: caps[first].to_string(),
        entity_type: caps
            .get(first + 1)
            .map(|m| EntityType::new(m.as_str()))
            .transpose()
            .map_err(|e| StorageError::Query(e.to_string()))?,
        name: caps.get(first + 2).map(|m| m.as_str().to_string()),
    })
}

fn return_list(raw: &str, declared: &[&str]) -> StorageResult<Vec<String>> {
    let columns: Vec<String> = raw.split(',').map(|c| c.trim().to_string()).collect();
    for column in &columns {
        if !declared.contains(&column.as_str()) {
            return Err(StorageError::Query(format!("unknown variable {:?} in RETURN", column)));
        }
    }
    Ok(columns)
}

fn parse_limit(raw: Option<&str>) -> StorageResult<Option<usize>> {
    raw.map(|s| s.parse::<usize>().map_err(|e| StorageError::Query(e.to_string())))
        .transpose()
}
