//! Pattern-based relation extraction between already extracted entities

use super::{CandidateEntity, CandidateRelation, ExtractionError, ExtractionResult};
use crate::graph::RelationType;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A phrase pattern tested against the text between two consecutive mentions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRule {
    /// Regular expression for the connecting phrase. A `kind` capture group
    /// produces the relation type `<kind>_of` when `relation_type` is empty.
    pub phrase: String,
    #[serde(default)]
    pub relation_type: Option<String>,
    pub confidence: f64,
    /// The later mention is the head ("X is described by Y")
    #[serde(default)]
    pub reversed: bool,
}

impl RelationRule {
    pub fn new(phrase: impl Into<String>, relation_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            phrase: phrase.into(),
            relation_type: Some(relation_type.into()),
            confidence,
            reversed: false,
        }
    }

    pub fn generic(phrase: impl Into<String>, confidence: f64) -> Self {
        Self {
            phrase: phrase.into(),
            relation_type: None,
            confidence,
            reversed: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationExtractorConfig {
    pub rules: Vec<RelationRule>,
    /// Emit `related_to` for co-mentioned pairs no rule connects
    pub cooccurrence: bool,
    pub cooccurrence_confidence: f64,
    /// Mentions further apart than this many bytes are never linked by a rule
    pub max_gap: usize,
}

impl Default for RelationExtractorConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            cooccurrence: false,
            cooccurrence_confidence: 0.3,
            max_gap: 80,
        }
    }
}

fn default_rules() -> Vec<RelationRule> {
    vec![
        RelationRule::new(r"is\s+(?:the\s+)?capital(?:\s+city)?\s+of", "capital_of", 0.9),
        RelationRule::new(r"is\s+(?:located|situated|based)\s+in", "located_in", 0.9),
        RelationRule::new(r"is\s+(?:a\s+|the\s+)?municipality\s+of", "municipality_of", 0.9),
        RelationRule::new(r"belongs\s+to", "belongs_to", 0.8),
        RelationRule::new(r"is\s+(?:a\s+)?part\s+of", "part_of", 0.8),
        RelationRule::new(r"works\s+(?:for|at)", "works_for", 0.8),
        RelationRule::new(r"(?:was\s+)?founded\s+by", "founded_by", 0.8),
        RelationRule::new(r"contains|includes|has", "contains", 0.7),
        RelationRule::new(r"is\s+similar\s+to|resembles|is\s+like", "similar_to", 0.7),
        RelationRule::new(r"describes|explains|defines", "describes", 0.7),
        RelationRule::new(r"is\s+described\s+by", "describes", 0.7).reversed(),
        RelationRule::new(r"is\s+related\s+to|relates\s+to|is\s+associated\s+with", "related_to", 0.6),
        RelationRule::generic(r"(?:is|was)\s+(?:a|an|the)\s+(?P<kind>\w+)\s+of", 0.6),
        RelationRule::new(r"in", "located_in", 0.5),
    ]
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    relation_type: Option<RelationType>,
    confidence: f64,
    reversed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Mention {
    start: usize,
    end: usize,
    entity: usize,
}

/// Relation extractor. Only links entities from the list it is given.
#[derive(Debug)]
pub struct RelationExtractor {
    rules: Vec<CompiledRule>,
    cooccurrence: Option<f64>,
    max_gap: usize,
}

impl Default for RelationExtractor {
    fn default() -> Self {
        Self::new(RelationExtractorConfig::default()).unwrap_or(Self {
            rules: Vec::new(),
            cooccurrence: None,
            max_gap: 80,
        })
    }
}

impl RelationExtractor {
    pub fn new(config: RelationExtractorConfig) -> ExtractionResult<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let pattern = format!(r"(?i)^\s*(?:{})\s*,?\s*$", rule.phrase);
            let regex = Regex::new(&pattern).map_err(|e| ExtractionError::InvalidPattern {
                pattern: rule.phrase.clone(),
                reason: e.to_string(),
            })?;
            let relation_type = match &rule.relation_type {
                Some(t) => Some(RelationType::new(t).map_err(|e| ExtractionError::InvalidPattern {
                    pattern: rule.phrase.clone(),
                    reason: e.to_string(),
                })?),
                None => None,
            };
            rules.push(CompiledRule {
                regex,
                relation_type,
                confidence: rule.confidence,
                reversed: rule.reversed,
            });
        }
        Ok(Self {
            rules,
            cooccurrence: config.cooccurrence.then_some(config.cooccurrence_confidence),
            max_gap: config.max_gap,
        })
    }

    /// Extract relations between the supplied entities.
    ///
    /// At most one candidate is returned per ordered (head, tail) pair: the
    /// most confident one, or the first seen when confidences are equal.
    pub fn extract(&self, text: &str, entities: &[CandidateEntity]) -> Vec<CandidateRelation> {
        if entities.len() < 2 || text.trim().is_empty() {
            return Vec::new();
        }

        let mentions = find_mentions(text, entities);
        let mut best: IndexMap<(usize, usize), CandidateRelation> = IndexMap::new();

        for sentence in sentence_spans(text) {
            let in_sentence: Vec<Mention> = mentions
                .iter()
                .copied()
                .filter(|m| m.start >= sentence.start && m.end <= sentence.end)
                .collect();
            let evidence = text[sentence.clone()].trim();

            for pair in in_sentence.windows(2) {
                let (left, right) = (pair[0], pair[1]);
                if left.entity == right.entity || right.start - left.end > self.max_gap {
                    continue;
                }
                let between = &text[left.end..right.start];
                for rule in &self.rules {
                    if let Some(candidate) = self.apply(rule, between, left.entity, right.entity, evidence) {
                        offer(&mut best, candidate);
                    }
                }
            }

            if let Some(confidence) = self.cooccurrence {
                let related = RelationType::new("related_to").ok();
                for (i, left) in in_sentence.iter().enumerate() {
                    for right in &in_sentence[i + 1..] {
                        if left.entity == right.entity || best.contains_key(&(left.entity, right.entity)) {
                            continue;
                        }
                        let Some(rt) = related.clone() else { continue };
                        offer(
                            &mut best,
                            CandidateRelation {
                                head: left.entity,
                                tail: right.entity,
                                relation_type: rt,
                                confidence,
                                description: Some(evidence.to_string()),
                            },
                        );
                    }
                }
            }
        }

        let relations: Vec<CandidateRelation> = best.into_values().collect();
        debug!(count = relations.len(), "Extracted relation candidates");
        relations
    }

    fn apply(
        &self,
        rule: &CompiledRule,
        between: &str,
        left: usize,
        right: usize,
        evidence: &str,
    ) -> Option<CandidateRelation> {
        let caps = rule.regex.captures(between)?;
        let relation_type = match &rule.relation_type {
            Some(t) => t.clone(),
            None => {
                let kind = caps.name("kind")?.as_str();
                RelationType::new(format!("{}_of", kind)).ok()?
            }
        };
        let (head, tail) = if rule.reversed { (right, left) } else { (left, right) };
        Some(CandidateRelation {
            head,
            tail,
            relation_type,
            confidence: rule.confidence,
            description: Some(evidence.to_string()),
        })
    }
}

/// Keep a candidate if it beats whatever is recorded for its ordered pair
fn offer(best: &mut IndexMap<(usize, usize), CandidateRelation>, candidate: CandidateRelation) {
    let key = (candidate.head, candidate.tail);
    match best.get_mut(&key) {
        Some(current) if candidate.confidence > current.confidence => *current = candidate,
        Some(_) => {}
        None => {
            best.insert(key, candidate);
        }
    }
}

/// Locate every mention of every entity name, longest match first on overlap
fn find_mentions(text: &str, entities: &[CandidateEntity]) -> Vec<Mention> {
    let mut raw = Vec::new();
    for (idx, entity) in entities.iter().enumerate() {
        let name = entity.name.trim();
        if name.is_empty() {
            continue;
        }
        let Ok(regex) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))) else {
            continue;
        };
        for m in regex.find_iter(text) {
            raw.push(Mention {
                start: m.start(),
                end: m.end(),
                entity: idx,
            });
        }
    }

    raw.sort_by(|a, b| {
        (b.end - b.start)
            .cmp(&(a.end - a.start))
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.entity.cmp(&b.entity))
    });
    let mut kept: Vec<Mention> = Vec::new();
    for m in raw {
        if !kept.iter().any(|k| m.start < k.end && k.start < m.end) {
            kept.push(m);
        }
    }
    kept.sort_by_key(|m| m.start);
    kept
}

/// Byte ranges of sentences, split after `.`, `!` or `?` followed by whitespace
fn sentence_spans(text: &str) -> Vec<std::ops::Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
            if at_boundary {
                let end = i + c.len_utf8();
                if end > start {
                    spans.push(start..end);
                }
                start = end;
            }
        }
    }
    if start < text.len() {
        spans.push(start..text.len());
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityType;

    fn candidate(name: &str, ty: &str) -> CandidateEntity {
        CandidateEntity::new(name, EntityType::new(ty).unwrap(), 0..0, 0.9)
    }

    #[test]
    fn test_capital_of() {
        let extractor = RelationExtractor::default();
        let entities = vec![candidate("Beijing", "city"), candidate("China", "country")];
        let found = extractor.extract("Beijing is the capital of China.", &entities);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation_type.as_str(), "capital_of");
        assert_eq!((found[0].head, found[0].tail), (0, 1));
        assert_eq!(found[0].confidence, 0.9);
    }

    #[test]
    fn test_generic_of_rule() {
        let extractor = RelationExtractor::default();
        let entities = vec![candidate("Lyon", "city"), candidate("France", "country")];
        let found = extractor.extract("Lyon is a prefecture of France.", &entities);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation_type.as_str(), "prefecture_of");
    }

    #[test]
    fn test_reversed_rule() {
        let extractor = RelationExtractor::default();
        let entities = vec![candidate("Gravity", "concept"), candidate("Newton", "person")];
        let found = extractor.extract("Gravity is described by Newton.", &entities);
        assert_eq!((found[0].head, found[0].tail), (1, 0));
        assert_eq!(found[0].relation_type.as_str(), "describes");
    }

    #[test]
    fn test_never_introduces_entities() {
        let extractor = RelationExtractor::default();
        let entities = vec![candidate("Beijing", "city")];
        assert!(extractor
            .extract("Beijing is the capital of China.", &entities)
            .is_empty());
    }

    #[test]
    fn test_equal_confidence_keeps_first_seen() {
        let config = RelationExtractorConfig {
            rules: vec![
                RelationRule::new("likes", "likes", 0.5),
                RelationRule::new("likes", "admires", 0.5),
            ],
            ..RelationExtractorConfig::default()
        };
        let extractor = RelationExtractor::new(config).unwrap();
        let entities = vec![candidate("Alice", "person"), candidate("Bob", "person")];
        let found = extractor.extract("Alice likes Bob.", &entities);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation_type.as_str(), "likes");
    }

    #[test]
    fn test_higher_confidence_replaces_in_place() {
        let config = RelationExtractorConfig {
            rules: vec![
                RelationRule::new("likes", "likes", 0.4),
                RelationRule::new("likes", "admires", 0.8),
            ],
            ..RelationExtractorConfig::default()
        };
        let extractor = RelationExtractor::new(config).unwrap();
        let entities = vec![candidate("Alice", "person"), candidate("Bob", "person")];
        let found = extractor.extract("Alice likes Bob.", &entities);
        assert_eq!(found[0].relation_type.as_str(), "admires");
    }

    #[test]
    fn test_mentions_do_not_cross_sentences() {
        let extractor = RelationExtractor::default();
        let entities = vec![candidate("Beijing", "city"), candidate("China", "country")];
        let found = extractor.extract("I saw Beijing. China has it.", &entities);
        assert!(found.is_empty());
    }

    #[test]
    fn test_cooccurrence_fallback() {
        let config = RelationExtractorConfig {
            cooccurrence: true,
            ..RelationExtractorConfig::default()
        };
        let extractor = RelationExtractor::new(config).unwrap();
        let entities = vec![candidate("Alice", "person"), candidate("Bob", "person")];
        let found = extractor.extract("Alice and Bob went hiking.", &entities);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation_type.as_str(), "related_to");
    }

    #[test]
    fn test_sentence_spans() {
        let spans = sentence_spans("One. Two! Three");
        assert_eq!(spans.len(), 3);
    }
}
