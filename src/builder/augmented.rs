//! Retrieval-augmented graph builder
//!
//! Ingests text the same way as the standard builder, but additionally
//! chunks and embeds every accepted unit so that questions can be answered
//! from a mix of graph structure and raw text. Four retrieval modes are
//! supported:
//!
//! - `naive`: top-k chunks by vector similarity
//! - `local`: entities named in the query plus their neighborhood
//! - `global`: connected communities ranked by term overlap
//! - `hybrid`: reciprocal rank fusion of graph-derived and vector chunks
//!
//! A graph mode that matches nothing answers in naive mode instead of
//! failing.

use super::backend::ExtractionBackend;
use super::chunk::{split_text, Chunk, ChunkIndex, ChunkStatistics};
use super::standard::{BuildReport, BuildResult, BuiltGraph};
use crate::algo::{expand_neighborhood, weakly_connected_components};
use crate::config::SearchConfig;
use crate::export::{write_graphml, ExportResult};
use crate::extract::SourceText;
use crate::graph::{normalize_name, EntityId, GraphId, KnowledgeGraph, RelationId};
use crate::llm::{LanguageModel, LlmError};
use crate::merge::MergeEngine;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Retrieval strategy for [`AugmentedGraphBuilder::search`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Naive,
    Local,
    Global,
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchMode::Naive => "naive",
            SearchMode::Local => "local",
            SearchMode::Global => "global",
            SearchMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "naive" => Ok(SearchMode::Naive),
            "local" => Ok(SearchMode::Local),
            "global" => Ok(SearchMode::Global),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub answer: String,
    /// Mode that produced the answer
    pub mode: SearchMode,
    pub requested_mode: SearchMode,
    pub entity_ids: Vec<EntityId>,
    pub relation_ids: Vec<RelationId>,
    pub chunk_ids: Vec<String>,
}

impl SearchResult {
    pub fn degraded(&self) -> bool {
        self.mode != self.requested_mode
    }
}

/// Material gathered by one retrieval mode before answer generation
#[derive(Debug, Default)]
struct Retrieved {
    entity_ids: Vec<EntityId>,
    relation_ids: Vec<RelationId>,
    chunk_ids: Vec<String>,
    context: Vec<String>,
}

const ANSWER_PROMPT: &str = "Answer the question using only the context below. \
If the context does not contain the answer, say so.";

pub struct AugmentedGraphBuilder {
    backend: Arc<dyn ExtractionBackend>,
    model: Arc<dyn LanguageModel>,
    config: SearchConfig,
    merge: MergeEngine,
    /// One chunk index per graph, so retrieval never crosses graphs
    chunks: RwLock<HashMap<GraphId, ChunkIndex>>,
}

impl AugmentedGraphBuilder {
    pub fn new(backend: Arc<dyn ExtractionBackend>, model: Arc<dyn LanguageModel>, config: SearchConfig) -> Self {
        Self {
            backend,
            model,
            config,
            merge: MergeEngine::new(false),
            chunks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_self_loops(mut self, allow: bool) -> Self {
        self.merge = MergeEngine::new(allow);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub async fn build(&self, texts: &[SourceText], name: &str) -> BuildResult<BuiltGraph> {
        let mut graph = KnowledgeGraph::new(name);
        let report = self.ingest(&mut graph, texts).await?;
        info!(
            "Built graph {} with {} ({} entities, {} relations, {} chunks)",
            graph.id(),
            self.backend.name(),
            graph.entity_count(),
            graph.relation_count(),
            self.statistics(graph.id()).chunk_count
        );
        Ok(BuiltGraph { graph, report })
    }

    /// Extract and index only the new units; on error the graph is unchanged
    pub async fn update(&self, graph: &mut KnowledgeGraph, texts: &[SourceText]) -> BuildResult<BuildReport> {
        let mut scratch = graph.clone();
        let mut report = self.ingest(&mut scratch, texts).await?;
        report.finish_update(graph, &mut scratch);
        *graph = scratch;
        info!("Updated graph {} to version {}", graph.id(), graph.version());
        Ok(report)
    }

    async fn ingest(&self, graph: &mut KnowledgeGraph, texts: &[SourceText]) -> BuildResult<BuildReport> {
        let outcomes = join_all(texts.iter().map(|unit| self.backend.extract(unit))).await;

        let mut report = BuildReport::default();
        let mut accepted = Vec::new();
        for (unit, outcome) in texts.iter().zip(outcomes) {
            if outcome.is_ok() {
                accepted.push(unit);
            }
            report.record(outcome, graph, &self.merge);
        }
        report.ensure_progress(false)?;
        self.index_chunks(graph.id(), &accepted).await?;
        report.version = graph.version();
        Ok(report)
    }

    async fn index_chunks(&self, graph_id: &GraphId, units: &[&SourceText]) -> BuildResult<()> {
        let pending: Vec<Chunk> = {
            let indexes = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
            let index = indexes.get(graph_id);
            let mut seen = BTreeSet::new();
            units
                .iter()
                .flat_map(|unit| {
                    split_text(&unit.text, self.config.chunk_size, self.config.chunk_overlap)
                        .into_iter()
                        .enumerate()
                        .map(|(position, text)| Chunk::new(unit.id.clone(), position, text))
                        .collect::<Vec<_>>()
                })
                .filter(|chunk| !index.map_or(false, |i| i.contains(&chunk.id)) && seen.insert(chunk.id.clone()))
                .collect()
        };
        if pending.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let vectors = self.model.embed(&texts).await?;
        if vectors.len() != pending.len() {
            return Err(LlmError::Api(format!(
                "expected {} embeddings, got {}",
                pending.len(),
                vectors.len()
            ))
            .into());
        }

        let mut indexes = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let index = indexes.entry(graph_id.clone()).or_default();
        for (chunk, vector) in pending.into_iter().zip(vectors) {
            index
                .add(chunk, vector)
                .map_err(|e| LlmError::Api(format!("unusable embedding: {}", e)))?;
        }
        debug!("Chunk index of {} holds {} chunks", graph_id, index.len());
        Ok(())
    }

    pub async fn search(&self, graph: &KnowledgeGraph, query: &str, mode: SearchMode) -> BuildResult<SearchResult> {
        let retrieved = match mode {
            SearchMode::Naive => None,
            SearchMode::Local => self.local(graph, query),
            SearchMode::Global => self.global(graph, query),
            SearchMode::Hybrid => self.hybrid(graph, query).await?,
        };
        let (answered_mode, retrieved) = match retrieved {
            Some(r) => (mode, r),
            None => {
                if mode != SearchMode::Naive {
                    debug!("No graph match for {:?} in {} mode, answering in naive mode", query, mode);
                }
                (SearchMode::Naive, self.naive(graph.id(), query).await?)
            }
        };

        let prompt = format!(
            "{}\n\nContext:\n{}\n\nQuestion: {}\n",
            ANSWER_PROMPT,
            retrieved.context.join("\n"),
            query
        );
        let answer = self.model.complete(&prompt).await?;
        Ok(SearchResult {
            answer,
            mode: answered_mode,
            requested_mode: mode,
            entity_ids: retrieved.entity_ids,
            relation_ids: retrieved.relation_ids,
            chunk_ids: retrieved.chunk_ids,
        })
    }

    async fn query_vector(&self, query: &str) -> BuildResult<Vec<f32>> {
        let mut vectors = self.model.embed(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::Api("no embedding returned for query".to_string()).into())
    }

    /// Chunk ids of one graph by vector similarity, best first
    async fn vector_ranking(&self, graph_id: &GraphId, query: &str, k: usize) -> BuildResult<Vec<(String, String)>> {
        if self.statistics(graph_id).chunk_count == 0 {
            return Ok(Vec::new());
        }
        let vector = self.query_vector(query).await?;
        let indexes = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = indexes.get(graph_id) else {
            return Ok(Vec::new());
        };
        let hits = index
            .search(&vector, k)
            .map_err(|e| LlmError::Api(format!("unusable query embedding: {}", e)))?;
        Ok(hits.into_iter().map(|(c, _)| (c.id.clone(), c.text.clone())).collect())
    }

    async fn naive(&self, graph_id: &GraphId, query: &str) -> BuildResult<Retrieved> {
        let hits = self.vector_ranking(graph_id, query, self.config.top_k).await?;
        let mut retrieved = Retrieved::default();
        for (id, text) in hits {
            retrieved.context.push(text);
            retrieved.chunk_ids.push(id);
        }
        Ok(retrieved)
    }

    fn local(&self, graph: &KnowledgeGraph, query: &str) -> Option<Retrieved> {
        let seeds = matching_entities(graph, query);
        if seeds.is_empty() {
            return None;
        }
        let members = expand_neighborhood(graph, &seeds, self.config.depth);
        let mut retrieved = describe_subgraph(graph, &members);
        retrieved.chunk_ids = self
            .graph_ranking(graph, &members)
            .into_iter()
            .take(self.config.top_k)
            .collect();
        Some(retrieved)
    }

    fn global(&self, graph: &KnowledgeGraph, query: &str) -> Option<Retrieved> {
        let terms = query_terms(query);
        if terms.is_empty() || graph.is_empty() {
            return None;
        }
        let wcc = weakly_connected_components(graph);
        let mut ranked: Vec<(usize, &Vec<EntityId>)> = wcc
            .components
            .iter()
            .map(|component| (community_overlap(graph, component, &terms), component))
            .filter(|(score, _)| *score > 0)
            .collect();
        if ranked.is_empty() {
            return None;
        }
        ranked.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.len().cmp(&a.1.len()))
                .then_with(|| a.1.first().cmp(&b.1.first()))
        });

        let mut retrieved = Retrieved::default();
        for (n, (_, component)) in ranked.into_iter().take(self.config.max_communities).enumerate() {
            let members: BTreeSet<EntityId> = component.iter().cloned().collect();
            let part = describe_subgraph(graph, &members);
            retrieved
                .context
                .push(format!("Community {} ({} entities):", n + 1, members.len()));
            retrieved.context.extend(part.context);
            retrieved.entity_ids.extend(part.entity_ids);
            retrieved.relation_ids.extend(part.relation_ids);
        }
        Some(retrieved)
    }

    async fn hybrid(&self, graph: &KnowledgeGraph, query: &str) -> BuildResult<Option<Retrieved>> {
        let seeds = matching_entities(graph, query);
        if seeds.is_empty() {
            return Ok(None);
        }
        let members = expand_neighborhood(graph, &seeds, self.config.depth);
        let graph_ranked = self.graph_ranking(graph, &members);
        let candidates = self.config.top_k.saturating_mul(2).max(1);
        let vector_ranked = self.vector_ranking(graph.id(), query, candidates).await?;

        let vector_ids: Vec<String> = vector_ranked.iter().map(|(id, _)| id.clone()).collect();
        let fused = reciprocal_rank_fusion(&[graph_ranked, vector_ids], self.config.rrf_k);

        let mut retrieved = describe_subgraph(graph, &members);
        let indexes = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let index = indexes.get(graph.id());
        for id in fused.into_iter().take(self.config.top_k) {
            if let Some(chunk) = index.and_then(|i| i.get(&id)) {
                retrieved.context.push(chunk.text.clone());
            }
            retrieved.chunk_ids.push(id);
        }
        Ok(Some(retrieved))
    }

    /// Chunks cut from the sources of `members`, ranked by how many members
    /// they support, ties by chunk id
    fn graph_ranking(&self, graph: &KnowledgeGraph, members: &BTreeSet<EntityId>) -> Vec<String> {
        let mut support: HashMap<&str, usize> = HashMap::new();
        for entity in members.iter().filter_map(|id| graph.entity(id)) {
            for source in &entity.source_ids {
                *support.entry(source.as_str()).or_default() += 1;
            }
        }
        let indexes = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = indexes.get(graph.id()) else {
            return Vec::new();
        };
        let mut ranked: Vec<(usize, String)> = index
            .chunks()
            .filter_map(|c| support.get(c.source_id.as_str()).map(|&n| (n, c.id.clone())))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, id)| id).collect()
    }

    pub fn export_graphml(&self, graph: &KnowledgeGraph) -> ExportResult<Vec<u8>> {
        write_graphml(graph)
    }

    /// Chunk statistics for one graph; empty when nothing was indexed for it
    pub fn statistics(&self, graph_id: &GraphId) -> ChunkStatistics {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(graph_id)
            .map(ChunkIndex::statistics)
            .unwrap_or_default()
    }
}

/// Entities whose normalized name occurs in the query on word boundaries,
/// sorted by id
fn matching_entities(graph: &KnowledgeGraph, query: &str) -> Vec<EntityId> {
    let padded = format!(" {} ", normalize_text(query));
    let mut found: Vec<EntityId> = graph
        .entities()
        .filter(|e| {
            let name = normalize_text(&e.name);
            !name.is_empty() && padded.contains(&format!(" {} ", name))
        })
        .map(|e| e.id.clone())
        .collect();
    found.sort();
    found
}

/// Lowercased alphanumeric words joined by single spaces
fn normalize_text(text: &str) -> String {
    normalize_name(
        &text
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>(),
    )
}

fn query_terms(query: &str) -> BTreeSet<String> {
    normalize_text(query)
        .split(' ')
        .filter(|t| t.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

/// Number of query terms that appear in the names, types or descriptions of
/// a community's entities
fn community_overlap(graph: &KnowledgeGraph, component: &[EntityId], terms: &BTreeSet<String>) -> usize {
    let mut words: BTreeSet<String> = BTreeSet::new();
    for entity in component.iter().filter_map(|id| graph.entity(id)) {
        let text = format!(
            "{} {} {}",
            entity.name,
            entity.entity_type.as_str().replace('_', " "),
            entity.description.as_deref().unwrap_or("")
        );
        words.extend(normalize_text(&text).split(' ').map(str::to_string));
    }
    terms.iter().filter(|t| words.contains(*t)).count()
}

/// Facts about the entities in `members` and the relations between them
fn describe_subgraph(graph: &KnowledgeGraph, members: &BTreeSet<EntityId>) -> Retrieved {
    let mut retrieved = Retrieved::default();
    for entity in members.iter().filter_map(|id| graph.entity(id)) {
        let line = match &entity.description {
            Some(d) => format!("{} ({}): {}", entity.name, entity.entity_type, d),
            None => format!("{} ({})", entity.name, entity.entity_type),
        };
        retrieved.context.push(line);
        retrieved.entity_ids.push(entity.id.clone());
    }
    let mut relations: Vec<_> = graph
        .relations()
        .filter(|r| members.contains(&r.head) && members.contains(&r.tail))
        .collect();
    relations.sort_by(|a, b| a.id.cmp(&b.id));
    for relation in relations {
        let name = |id: &EntityId| graph.entity(id).map_or_else(|| id.to_string(), |e| e.name.clone());
        retrieved.context.push(format!(
            "{} -[{}]-> {}",
            name(&relation.head),
            relation.relation_type,
            name(&relation.tail)
        ));
        retrieved.relation_ids.push(relation.id.clone());
    }
    retrieved
}

/// Fuse rankings with score(d) = sum of 1 / (k + rank), rank starting at 1.
/// Ties are broken by id.
fn reciprocal_rank_fusion(rankings: &[Vec<String>], k: f64) -> Vec<String> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for ranking in rankings {
        for (rank, id) in ranking.iter().enumerate() {
            *scores.entry(id.as_str()).or_default() += 1.0 / (k + rank as f64 + 1.0);
        }
    }
    let mut fused: Vec<(&str, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    fused.into_iter().map(|(id, _)| id.to_string()).collect()
}
