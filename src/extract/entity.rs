//! Rule-based entity extraction over a configurable type vocabulary

use super::{CandidateEntity, ExtractionContext, ExtractionError, ExtractionResult};
use crate::graph::{normalize_name, EntityType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

/// Words that never start an entity name and lower a candidate's confidence
pub const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Confidence assigned to a lexicon hit
const LEXICON_CONFIDENCE: f64 = 0.9;

/// How one entity type is recognized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRule {
    pub entity_type: EntityType,
    /// Known names of this type, matched case-insensitively on word boundaries
    #[serde(default)]
    pub lexicon: Vec<String>,
    /// Trailing words marking a capitalized phrase as this type ("University")
    #[serde(default)]
    pub suffixes: Vec<String>,
    /// Leading words marking a capitalized phrase as this type ("Dr")
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Raw regular expressions. A `name` capture group narrows the match.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl TypeRule {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            lexicon: Vec::new(),
            suffixes: Vec::new(),
            prefixes: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn lexicon<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lexicon.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn suffixes<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes.extend(words.into_iter().map(Into::into));
        self
    }

    pub fn prefixes<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes.extend(words.into_iter().map(Into::into));
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }
}

/// Entity extractor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub rules: Vec<TypeRule>,
    /// Candidates below this confidence are dropped
    pub min_confidence: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            min_confidence: 0.5,
        }
    }
}

impl ExtractorConfig {
    /// Configuration restricted to the given rules
    pub fn with_rules(rules: Vec<TypeRule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }
}

fn default_rules() -> Vec<TypeRule> {
    let ty = |s: &str| EntityType::new(s).ok();
    let mut rules = Vec::new();
    if let Some(t) = ty("person") {
        rules.push(TypeRule::new(t).prefixes(["Mr", "Mrs", "Ms", "Dr", "Prof"]));
    }
    if let Some(t) = ty("organization") {
        rules.push(TypeRule::new(t).suffixes(["Inc", "Corp", "Ltd", "LLC", "Company", "Organization"]));
    }
    if let Some(t) = ty("university") {
        rules.push(TypeRule::new(t).suffixes(["University", "College", "Institute"]));
    }
    if let Some(t) = ty("location") {
        rules.push(
            TypeRule::new(t)
                .suffixes(["City", "State", "Country", "Province", "District"])
                .pattern(r"\b(?:in|at|from) (?P<name>[A-Z][a-z]+)\b"),
        );
    }
    if let Some(t) = ty("concept") {
        rules.push(TypeRule::new(t).pattern(r"\b[a-z]+ (?:concept|theory|principle|method|approach)\b"));
    }
    rules
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MatchKind {
    Lexicon,
    Phrase,
}

#[derive(Debug)]
struct CompiledRule {
    entity_type: EntityType,
    matchers: Vec<(Regex, MatchKind)>,
}

/// A raw hit before overlap resolution
#[derive(Debug, Clone)]
struct Hit {
    span: Range<usize>,
    name: String,
    entity_type: EntityType,
    confidence: f64,
    order: usize,
}

/// Rule-based entity extractor. Pure and cheap to share across threads.
#[derive(Debug)]
pub struct EntityExtractor {
    rules: Vec<CompiledRule>,
    min_confidence: f64,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        // The built-in rules are fixed strings and always compile.
        Self::new(ExtractorConfig::default()).unwrap_or(Self {
            rules: Vec::new(),
            min_confidence: 0.5,
        })
    }
}

impl EntityExtractor {
    pub fn new(config: ExtractorConfig) -> ExtractionResult<Self> {
        let rules = config
            .rules
            .iter()
            .map(compile_rule)
            .collect::<ExtractionResult<Vec<_>>>()?;
        Ok(Self {
            rules,
            min_confidence: config.min_confidence,
        })
    }

    /// Entity types this extractor can produce, in rule order
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.rules.iter().map(|r| r.entity_type.clone()).collect()
    }

    /// Extract candidate entities ordered by their position in `text`
    pub fn extract(&self, text: &str, context: Option<&ExtractionContext>) -> Vec<CandidateEntity> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut hits = Vec::new();
        for rule in &self.rules {
            if let Some(ctx) = context {
                if !ctx.allows(&rule.entity_type) {
                    continue;
                }
            }
            for (regex, kind) in &rule.matchers {
                for caps in regex.captures_iter(text) {
                    let m = match caps.name("name").or_else(|| caps.get(0)) {
                        Some(m) => m,
                        None => continue,
                    };
                    let Some((span, name)) = trim_leading_stopwords(text, m.start()..m.end()) else {
                        continue;
                    };
                    if name.chars().count() < 2 {
                        continue;
                    }
                    let confidence = match kind {
                        MatchKind::Lexicon => LEXICON_CONFIDENCE,
                        MatchKind::Phrase => heuristic_confidence(&name),
                    };
                    if confidence < self.min_confidence {
                        continue;
                    }
                    let order = hits.len();
                    hits.push(Hit {
                        span,
                        name,
                        entity_type: rule.entity_type.clone(),
                        confidence,
                        order,
                    });
                }
            }
        }

        let candidates = resolve(hits);
        debug!(
            source = context.and_then(|c| c.source_id.as_deref()).unwrap_or("-"),
            count = candidates.len(),
            "Extracted entity candidates"
        );
        candidates
    }
}

/// Heuristic confidence for a pattern-matched name
pub fn heuristic_confidence(name: &str) -> f64 {
    let len = name.chars().count();
    let mut confidence: f64 = 0.5;
    if len > 1 {
        confidence += 0.1;
    }
    if len > 3 {
        confidence += 0.1;
    }
    if name.chars().next().map_or(false, |c| c.is_uppercase()) {
        confidence += 0.1;
    }
    if is_stopword(name) {
        confidence -= 0.3;
    }
    confidence.clamp(0.0, 1.0)
}

pub(crate) fn is_stopword(word: &str) -> bool {
    let lower = word.to_lowercase();
    STOPWORDS.contains(&lower.as_str())
}

fn compile_rule(rule: &TypeRule) -> ExtractionResult<CompiledRule> {
    let mut matchers = Vec::new();

    if !rule.lexicon.is_empty() {
        let mut terms: Vec<&String> = rule.lexicon.iter().filter(|t| !t.trim().is_empty()).collect();
        // Longest first so "New York City" wins over "New York"
        terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = terms
            .iter()
            .map(|t| regex::escape(t.trim()))
            .collect::<Vec<_>>()
            .join("|");
        if !alternation.is_empty() {
            matchers.push((build(&format!(r"(?i)\b(?:{})\b", alternation))?, MatchKind::Lexicon));
        }
    }

    if !rule.suffixes.is_empty() {
        let words = escaped(&rule.suffixes);
        let pattern = format!(r"\b(?:[A-Z][\w&'-]*\s+){{1,4}}(?:{})\b", words);
        matchers.push((build(&pattern)?, MatchKind::Phrase));
    }

    if !rule.prefixes.is_empty() {
        let words = escaped(&rule.prefixes);
        let pattern = format!(r"\b(?:{})\.?\s+[A-Z][\w'-]+(?:\s+[A-Z][\w'-]+)?", words);
        matchers.push((build(&pattern)?, MatchKind::Phrase));
    }

    for pattern in &rule.patterns {
        matchers.push((build(pattern)?, MatchKind::Phrase));
    }

    Ok(CompiledRule {
        entity_type: rule.entity_type.clone(),
        matchers,
    })
}

fn escaped(words: &[String]) -> String {
    words
        .iter()
        .map(|w| regex::escape(w.trim().trim_end_matches('.')))
        .collect::<Vec<_>>()
        .join("|")
}

fn build(pattern: &str) -> ExtractionResult<Regex> {
    Regex::new(pattern).map_err(|e| ExtractionError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Drop leading stopwords ("The Tsinghua University") and surrounding
/// whitespace from a match, returning the adjusted span and name.
fn trim_leading_stopwords(text: &str, span: Range<usize>) -> Option<(Range<usize>, String)> {
    let mut start = span.start;
    let end = span.end;
    loop {
        let slice = &text[start..end];
        let trimmed = slice.trim_start();
        start += slice.len() - trimmed.len();
        let first_word_len = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        if first_word_len == 0 || !is_stopword(&trimmed[..first_word_len]) {
            break;
        }
        if first_word_len == trimmed.len() {
            return None;
        }
        start += first_word_len;
    }
    let name = text[start..end].trim_end();
    if name.is_empty() {
        return None;
    }
    Some((start..start + name.len(), name.to_string()))
}

/// Resolve overlapping hits (longer span, then higher confidence, then
/// earlier start) and report each normalized (name, type) once.
fn resolve(mut hits: Vec<Hit>) -> Vec<CandidateEntity> {
    hits.sort_by(|a, b| {
        b.span
            .len()
            .cmp(&a.span.len())
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.span.start.cmp(&b.span.start))
            .then_with(|| a.order.cmp(&b.order))
    });

    let mut accepted: Vec<Hit> = Vec::new();
    for hit in hits {
        let overlaps = accepted
            .iter()
            .any(|a| hit.span.start < a.span.end && a.span.start < hit.span.end);
        if !overlaps {
            accepted.push(hit);
        }
    }
    accepted.sort_by_key(|h| h.span.start);

    let mut seen: HashMap<(String, EntityType), usize> = HashMap::new();
    let mut out: Vec<CandidateEntity> = Vec::new();
    for hit in accepted {
        let key = (normalize_name(&hit.name), hit.entity_type.clone());
        match seen.get(&key) {
            Some(&idx) => {
                if hit.confidence > out[idx].confidence {
                    out[idx].confidence = hit.confidence;
                }
            }
            None => {
                seen.insert(key, out.len());
                out.push(CandidateEntity::new(hit.name, hit.entity_type, hit.span, hit.confidence));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> EntityType {
        EntityType::new(s).unwrap()
    }

    fn geo_extractor() -> EntityExtractor {
        EntityExtractor::new(ExtractorConfig::with_rules(vec![
            TypeRule::new(ty("city")).lexicon(["Beijing", "Shanghai"]),
            TypeRule::new(ty("country")).lexicon(["China"]),
            TypeRule::new(ty("university")).suffixes(["University"]),
        ]))
        .unwrap()
    }

    #[test]
    fn test_lexicon_and_suffix_rules() {
        let extractor = geo_extractor();
        let found = extractor.extract("Tsinghua University is located in Beijing.", None);
        let names: Vec<(&str, &str)> = found
            .iter()
            .map(|c| (c.name.as_str(), c.entity_type.as_str()))
            .collect();
        assert_eq!(names, vec![("Tsinghua University", "university"), ("Beijing", "city")]);
        assert_eq!(&"Tsinghua University is located in Beijing."[found[1].span.clone()], "Beijing");
    }

    #[test]
    fn test_empty_and_unrecognized_input() {
        let extractor = geo_extractor();
        assert!(extractor.extract("", None).is_empty());
        assert!(extractor.extract("   \n", None).is_empty());
        assert!(extractor.extract("nothing to see here ###", None).is_empty());
    }

    #[test]
    fn test_leading_stopword_is_trimmed() {
        let extractor = geo_extractor();
        let found = extractor.extract("The Peking University campus", None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Peking University");
    }

    #[test]
    fn test_repeated_mentions_reported_once() {
        let extractor = geo_extractor();
        let found = extractor.extract("Beijing, beijing and BEIJING.", None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].span, 0..7);
    }

    #[test]
    fn test_context_restricts_types() {
        let extractor = geo_extractor();
        let ctx = ExtractionContext {
            source_id: None,
            allowed_types: Some([ty("country")].into_iter().collect()),
        };
        let found = extractor.extract("Beijing is the capital of China.", Some(&ctx));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "China");
    }

    #[test]
    fn test_default_rules() {
        let extractor = EntityExtractor::default();
        let found = extractor.extract("Dr. Smith joined Acme Corp last year.", None);
        let types: Vec<&str> = found.iter().map(|c| c.entity_type.as_str()).collect();
        assert_eq!(types, vec!["person", "organization"]);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let config = ExtractorConfig::with_rules(vec![TypeRule::new(ty("x")).pattern("(unclosed")]);
        assert!(matches!(
            EntityExtractor::new(config),
            Err(ExtractionError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_heuristic_confidence() {
        assert!((heuristic_confidence("Beijing") - 0.8).abs() < 1e-9);
        assert!((heuristic_confidence("the") - 0.4).abs() < 1e-9);
    }
}
