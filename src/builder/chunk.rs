//! Text chunks and their vector index
//!
//! Chunks are located approximately with HNSW and then re-ranked with exact
//! cosine similarity, so results for small corpora are exact.

use crate::graph::types::content_id;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type VectorResult<T> = Result<T, VectorError>;

/// Cosine distance implementation for hnsw_rs
#[derive(Clone, Copy, Debug, Default)]
pub struct CosineDistance;

impl Distance<f32> for CosineDistance {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        1.0 - cosine_similarity(va, vb)
    }
}

pub fn cosine_similarity(va: &[f32], vb: &[f32]) -> f32 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (a, b) in va.iter().zip(vb.iter()) {
        dot += a * b;
        norm_a += a * a;
        norm_b += b * b;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// A piece of ingested text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    /// Position of the chunk within its source
    pub position: usize,
    pub text: String,
}

impl Chunk {
    pub fn new(source_id: impl Into<String>, position: usize, text: impl Into<String>) -> Self {
        let source_id = source_id.into();
        let text = text.into();
        Self {
            id: content_id("chunk", &format!("{}\u{1f}{}\u{1f}{}", source_id, position, text)),
            source_id,
            position,
            text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStatistics {
    pub chunk_count: usize,
    pub source_count: usize,
    pub dimension: Option<usize>,
    pub total_chars: usize,
    pub average_chunk_chars: f64,
}

/// Split text into windows of `chunk_size` characters that overlap by
/// `overlap` characters
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;
    let chunk_size = chunk_size.max(1);
    if char_count <= chunk_size {
        return vec![text.to_string()];
    }
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_count {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk store with an HNSW index over chunk embeddings
pub struct ChunkIndex {
    dimension: Option<usize>,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    by_id: HashMap<String, usize>,
    hnsw: Hnsw<'static, f32, CosineDistance>,
}

// Implement Debug manually because Hnsw doesn't implement it
impl std::fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIndex")
            .field("dimension", &self.dimension)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkIndex {
    pub fn new() -> Self {
        // HNSW parameters
        let max_elements = 100_000;
        let m = 16;
        let ef_construction = 200;

        Self {
            dimension: None,
            chunks: Vec::new(),
            vectors: Vec::new(),
            by_id: HashMap::new(),
            hnsw: Hnsw::new(m, max_elements, 16, ef_construction, CosineDistance),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.by_id.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.by_id.get(chunk_id).map(|&i| &self.chunks[i])
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Chunks cut from one source unit, in position order
    pub fn chunks_of_source(&self, source_id: &str) -> Vec<&Chunk> {
        let mut found: Vec<&Chunk> = self.chunks.iter().filter(|c| c.source_id == source_id).collect();
        found.sort_by_key(|c| c.position);
        found
    }

    /// Add a chunk; returns false when a chunk with the same id is present.
    /// The first vector fixes the index dimension.
    pub fn add(&mut self, chunk: Chunk, vector: Vec<f32>) -> VectorResult<bool> {
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }
        if self.by_id.contains_key(&chunk.id) {
            return Ok(false);
        }
        self.dimension = Some(vector.len());

        let idx = self.chunks.len();
        self.hnsw.insert((&vector, idx));
        self.by_id.insert(chunk.id.clone(), idx);
        self.chunks.push(chunk);
        self.vectors.push(vector);
        Ok(true)
    }

    /// The `k` chunks most similar to `query`, best first, ties by chunk id
    pub fn search(&self, query: &[f32], k: usize) -> VectorResult<Vec<(&Chunk, f32)>> {
        let Some(expected) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let candidates = (k * 4).max(16).min(self.chunks.len());
        let ef_search = candidates * 2;
        let mut seen = BTreeSet::new();
        let mut scored: Vec<(usize, f32)> = self
            .hnsw
            .search(query, candidates, ef_search)
            .into_iter()
            .filter(|n| n.d_id < self.chunks.len() && seen.insert(n.d_id))
            .map(|n| (n.d_id, cosine_similarity(query, &self.vectors[n.d_id])))
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.chunks[a.0].id.cmp(&self.chunks[b.0].id))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(i, s)| (&self.chunks[i], s)).collect())
    }

    pub fn statistics(&self) -> ChunkStatistics {
        let total_chars: usize = self.chunks.iter().map(|c| c.text.chars().count()).sum();
        let sources: BTreeSet<&str> = self.chunks.iter().map(|c| c.source_id.as_str()).collect();
        ChunkStatistics {
            chunk_count: self.chunks.len(),
            source_count: sources.len(),
            dimension: self.dimension,
            total_chars,
            average_chunk_chars: if self.chunks.is_empty() {
                0.0
            } else {
                total_chars as f64 / self.chunks.len() as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_text_overlaps() {
        let chunks = split_text("abcdefghij", 4, 1);
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
        assert_eq!(split_text("short", 10, 2), vec!["short"]);
        assert!(split_text("   ", 10, 2).is_empty());
    }

    #[test]
    fn test_split_text_respects_char_boundaries() {
        let chunks = split_text("北京是中国的首都", 3, 1);
        assert_eq!(chunks[0], "北京是");
        assert_eq!(chunks[1], "是中国");
    }

    #[test]
    fn test_search_ranks_exactly() {
        let mut index = ChunkIndex::new();
        index.add(Chunk::new("d1", 0, "x"), vec![1.0, 0.0, 0.0]).unwrap();
        index.add(Chunk::new("d1", 1, "y"), vec![0.0, 1.0, 0.0]).unwrap();
        index.add(Chunk::new("d2", 0, "z"), vec![0.0, 0.1, 0.9]).unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.text, "x");
        assert_eq!(results[1].0.text, "y");
    }

    #[test]
    fn test_duplicates_and_dimension_checks() {
        let mut index = ChunkIndex::new();
        assert!(index.add(Chunk::new("d", 0, "a"), vec![1.0, 0.0]).unwrap());
        assert!(!index.add(Chunk::new("d", 0, "a"), vec![1.0, 0.0]).unwrap());
        assert_eq!(
            index.add(Chunk::new("d", 1, "b"), vec![1.0]),
            Err(VectorError::DimensionMismatch { expected: 2, got: 1 })
        );
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_err());
        let stats = index.statistics();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.source_count, 1);
    }
}
