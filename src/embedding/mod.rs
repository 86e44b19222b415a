//! Entity embeddings
//!
//! Two objectives learn one vector per entity: node2vec-style random walks
//! with skip-gram negative sampling ([`Algorithm::RandomWalk`]) and TransE
//! translation scoring ([`Algorithm::Translation`]). Training is bounded by
//! an epoch count, an optional wall-clock budget and a [`CancelToken`]; the
//! returned model is always the best epoch that ran to completion.
//!
//! Models remember a fingerprint of every entity's neighborhood. Passing a
//! previous model to [`EmbeddingTrainer::train_warm`] freezes the vectors of
//! entities whose neighborhood did not change.

pub mod cancel;
mod translation;
mod walk;

pub use cancel::CancelToken;

use crate::graph::{Direction, EntityId, KnowledgeGraph};
use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("Cannot train embeddings on an empty graph")]
    EmptyGraph,

    #[error("Invalid embedding configuration: {0}")]
    InvalidConfig(String),

    #[error("Training task failed: {0}")]
    Join(String),
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RandomWalk,
    Translation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub algorithm: Algorithm,
    pub dimension: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Negative samples per positive pair (walks) ignored by TransE
    pub negative_samples: usize,
    pub seed: u64,
    /// Wall-clock budget for one training run
    pub time_budget_ms: Option<u64>,
    pub walk_length: usize,
    pub walks_per_entity: usize,
    pub window: usize,
    /// node2vec return parameter
    pub p: f64,
    /// node2vec in-out parameter
    pub q: f64,
    /// TransE margin
    pub margin: f32,
    /// Triples per cancellation check (TransE)
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RandomWalk,
            dimension: 64,
            epochs: 10,
            learning_rate: 0.025,
            negative_samples: 5,
            seed: 42,
            time_budget_ms: None,
            walk_length: 80,
            walks_per_entity: 10,
            window: 5,
            p: 1.0,
            q: 1.0,
            margin: 1.0,
            batch_size: 128,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> EmbeddingResult<()> {
        let invalid = |msg: &str| Err(EmbeddingError::InvalidConfig(msg.to_string()));
        if self.dimension == 0 {
            return invalid("dimension must be positive");
        }
        if self.epochs == 0 {
            return invalid("epochs must be positive");
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        match self.algorithm {
            Algorithm::RandomWalk => {
                if self.walk_length < 2 || self.walks_per_entity == 0 || self.window == 0 {
                    return invalid("walk_length must be at least 2, walks_per_entity and window positive");
                }
                if !(self.p > 0.0 && self.q > 0.0) {
                    return invalid("p and q must be positive");
                }
            }
            Algorithm::Translation => {
                if !(self.margin > 0.0) || self.batch_size == 0 {
                    return invalid("margin and batch_size must be positive");
                }
            }
        }
        Ok(())
    }

    fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    Completed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: EmbeddingModel,
    pub status: TrainingStatus,
    /// Epochs that ran to completion
    pub epochs_run: usize,
    /// Loss of the epoch whose vectors were kept
    pub final_loss: Option<f64>,
    pub loss_history: Vec<f64>,
}

/// Trained vectors keyed by entity id
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingModel {
    algorithm: Algorithm,
    ids: Vec<EntityId>,
    index: HashMap<EntityId, usize>,
    vectors: Array2<f32>,
    fingerprints: Vec<u64>,
}

/// Persistable form of an [`EmbeddingModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSnapshot {
    pub algorithm: Algorithm,
    pub dimension: usize,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub entity_id: EntityId,
    pub fingerprint: u64,
    pub vector: Vec<f32>,
}

impl EmbeddingModel {
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn entity_ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn get_vector(&self, id: &EntityId) -> Option<ArrayView1<'_, f32>> {
        self.index.get(id).map(|&i| self.vectors.row(i))
    }

    pub fn fingerprint(&self, id: &EntityId) -> Option<u64> {
        self.index.get(id).map(|&i| self.fingerprints[i])
    }

    /// Cosine similarity in [-1, 1]; None when either entity is unknown
    pub fn similarity(&self, a: &EntityId, b: &EntityId) -> Option<f32> {
        Some(cosine(self.get_vector(a)?, self.get_vector(b)?))
    }

    /// The `k` entities most similar to `id`, best first, ties by id
    pub fn most_similar(&self, id: &EntityId, k: usize) -> Vec<(EntityId, f32)> {
        let Some(query) = self.get_vector(id) else {
            return Vec::new();
        };
        let mut scored: Vec<(EntityId, f32)> = self
            .ids
            .iter()
            .enumerate()
            .filter(|(_, other)| *other != id)
            .map(|(i, other)| (other.clone(), cosine(query, self.vectors.row(i))))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    pub fn to_snapshot(&self) -> EmbeddingSnapshot {
        EmbeddingSnapshot {
            algorithm: self.algorithm,
            dimension: self.dimension(),
            entries: self
                .ids
                .iter()
                .enumerate()
                .map(|(i, id)| SnapshotEntry {
                    entity_id: id.clone(),
                    fingerprint: self.fingerprints[i],
                    vector: self.vectors.row(i).to_vec(),
                })
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: EmbeddingSnapshot) -> EmbeddingResult<Self> {
        let dim = snapshot.dimension;
        let mut ids = Vec::with_capacity(snapshot.entries.len());
        let mut fingerprints = Vec::with_capacity(snapshot.entries.len());
        let mut flat = Vec::with_capacity(snapshot.entries.len() * dim);
        for entry in snapshot.entries {
            if entry.vector.len() != dim {
                return Err(EmbeddingError::InvalidConfig(format!(
                    "vector for {} has dimension {}, expected {}",
                    entry.entity_id,
                    entry.vector.len(),
                    dim
                )));
            }
            ids.push(entry.entity_id);
            fingerprints.push(entry.fingerprint);
            flat.extend(entry.vector);
        }
        let vectors = Array2::from_shape_vec((ids.len(), dim), flat)
            .map_err(|e| EmbeddingError::InvalidConfig(e.to_string()))?;
        let index = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
        Ok(Self {
            algorithm: snapshot.algorithm,
            ids,
            index,
            vectors,
            fingerprints,
        })
    }
}

/// Cosine of two vectors, 0 when either is zero
pub fn cosine(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let norms = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norms == 0.0 {
        return 0.0;
    }
    (a.dot(&b) / norms).clamp(-1.0, 1.0)
}

pub(crate) fn normalize_row(row: &mut ArrayViewMut1<'_, f32>) {
    let norm = row.dot(row).sqrt();
    if norm > 0.0 {
        row.mapv_inplace(|v| v / norm);
    }
}

/// Digest of an entity's incident relations (endpoints, types and weights)
pub fn neighborhood_fingerprint(graph: &KnowledgeGraph, id: &EntityId) -> u64 {
    let mut lines: Vec<String> = graph
        .relations_of(id, Direction::Both)
        .into_iter()
        .map(|r| format!("{}\x1f{}\x1f{}\x1f{:x}", r.head, r.relation_type, r.tail, r.weight.to_bits()))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    hasher.update(id.as_str().as_bytes());
    for line in &lines {
        hasher.update([0x1e]);
        hasher.update(line.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// One training objective. `interrupt` is polled between batches; an
/// interrupted epoch reports why it stopped and its updates are discarded.
pub(crate) trait EpochRunner {
    fn run_epoch(
        &mut self,
        vectors: &mut Array2<f32>,
        frozen: &[bool],
        rng: &mut StdRng,
        interrupt: &dyn Fn() -> Option<TrainingStatus>,
    ) -> Result<f64, TrainingStatus>;
}

pub struct EmbeddingTrainer {
    config: EmbeddingConfig,
}

impl EmbeddingTrainer {
    pub fn new(config: EmbeddingConfig) -> EmbeddingResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn train(&self, graph: &KnowledgeGraph, cancel: &CancelToken) -> EmbeddingResult<TrainOutcome> {
        self.train_warm(graph, None, cancel)
    }

    /// Train starting from `previous`, freezing entities whose neighborhood
    /// fingerprint is unchanged
    pub fn train_warm(
        &self,
        graph: &KnowledgeGraph,
        previous: Option<&EmbeddingModel>,
        cancel: &CancelToken,
    ) -> EmbeddingResult<TrainOutcome> {
        if graph.is_empty() {
            return Err(EmbeddingError::EmptyGraph);
        }
        let config = &self.config;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let ids: Vec<EntityId> = graph.entity_ids().into_iter().collect();
        let index: HashMap<EntityId, usize> = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
        let fingerprints: Vec<u64> = ids.iter().map(|id| neighborhood_fingerprint(graph, id)).collect();

        let previous = previous.filter(|p| {
            let compatible = p.algorithm == config.algorithm && p.dimension() == config.dimension;
            if !compatible {
                warn!(
                    "Ignoring previous model ({:?}, dim {}) for {:?} training with dim {}",
                    p.algorithm,
                    p.dimension(),
                    config.algorithm,
                    config.dimension
                );
            }
            compatible
        });
        let (mut vectors, frozen) = self.initialize(&ids, &fingerprints, previous, &mut rng);

        let mut runner: Box<dyn EpochRunner> = match config.algorithm {
            Algorithm::RandomWalk => Box::new(walk::RandomWalkTrainer::new(graph, &index, config)?),
            Algorithm::Translation => Box::new(translation::TranslationTrainer::new(graph, &index, config, &mut rng)),
        };

        let started = Instant::now();
        let budget = config.time_budget();
        let interrupt = || {
            if cancel.is_cancelled() {
                Some(TrainingStatus::Cancelled)
            } else if budget.map_or(false, |b| started.elapsed() >= b) {
                Some(TrainingStatus::TimedOut)
            } else {
                None
            }
        };

        let mut best = vectors.clone();
        let mut best_loss: Option<f64> = None;
        let mut loss_history = Vec::with_capacity(config.epochs);
        let mut status = TrainingStatus::Completed;

        for epoch in 0..config.epochs {
            if let Some(stop) = interrupt() {
                status = stop;
                break;
            }
            match runner.run_epoch(&mut vectors, &frozen, &mut rng, &interrupt) {
                Ok(loss) => {
                    debug!(epoch, loss, "Embedding epoch finished");
                    loss_history.push(loss);
                    if best_loss.map_or(true, |b| loss <= b) {
                        best_loss = Some(loss);
                        best.assign(&vectors);
                    }
                }
                Err(stop) => {
                    status = stop;
                    break;
                }
            }
        }

        info!(
            "Embedding training {:?}: {} entities, {} epochs, {} frozen, status {:?}",
            config.algorithm,
            ids.len(),
            loss_history.len(),
            frozen.iter().filter(|f| **f).count(),
            status
        );

        Ok(TrainOutcome {
            model: EmbeddingModel {
                algorithm: config.algorithm,
                ids,
                index,
                vectors: best,
                fingerprints,
            },
            status,
            epochs_run: loss_history.len(),
            final_loss: best_loss,
            loss_history,
        })
    }

    /// Run [`train_warm`](Self::train_warm) on the blocking pool
    pub async fn spawn(
        self,
        graph: Arc<KnowledgeGraph>,
        previous: Option<EmbeddingModel>,
        cancel: CancelToken,
    ) -> EmbeddingResult<TrainOutcome> {
        tokio::task::spawn_blocking(move || self.train_warm(&graph, previous.as_ref(), &cancel))
            .await
            .map_err(|e| EmbeddingError::Join(e.to_string()))?
    }

    fn initialize(
        &self,
        ids: &[EntityId],
        fingerprints: &[u64],
        previous: Option<&EmbeddingModel>,
        rng: &mut StdRng,
    ) -> (Array2<f32>, Vec<bool>) {
        let dim = self.config.dimension;
        let bound = 6.0 / (dim as f32).sqrt();
        let mut vectors = Array2::<f32>::zeros((ids.len(), dim));
        let mut frozen = vec![false; ids.len()];

        for (i, id) in ids.iter().enumerate() {
            let mut row = vectors.row_mut(i);
            match previous.and_then(|p| p.index.get(id).map(|&j| (p, j))) {
                Some((prev, j)) => {
                    row.assign(&prev.vectors.row(j));
                    frozen[i] = prev.fingerprints[j] == fingerprints[i];
                }
                None => {
                    row.iter_mut().for_each(|v| *v = rng.gen_range(-bound..bound));
                    normalize_row(&mut row);
                }
            }
        }
        (vectors, frozen)
    }
}
