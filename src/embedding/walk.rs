//! Biased random walks with skip-gram negative sampling

use super::{EmbeddingConfig, EmbeddingError, EmbeddingResult, EpochRunner, TrainingStatus};
use crate::graph::{EntityId, KnowledgeGraph};
use ndarray::{Array1, Array2};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::HashMap;

pub(crate) struct RandomWalkTrainer {
    /// Undirected adjacency, sorted and deduplicated, self loops removed
    neighbors: Vec<Vec<usize>>,
    context: Array2<f32>,
    noise: WeightedIndex<f64>,
    learning_rate: f32,
    negative_samples: usize,
    walk_length: usize,
    walks_per_entity: usize,
    window: usize,
    p: f64,
    q: f64,
}

impl RandomWalkTrainer {
    pub(crate) fn new(
        graph: &KnowledgeGraph,
        index: &HashMap<EntityId, usize>,
        config: &EmbeddingConfig,
    ) -> EmbeddingResult<Self> {
        let mut neighbors = vec![Vec::new(); index.len()];
        for relation in graph.relations() {
            let (Some(&h), Some(&t)) = (index.get(&relation.head), index.get(&relation.tail)) else {
                continue;
            };
            if h != t {
                neighbors[h].push(t);
                neighbors[t].push(h);
            }
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }

        // Unigram^0.75 over degree, smoothed so isolated entities stay sampleable
        let noise = WeightedIndex::new(neighbors.iter().map(|n| (n.len() as f64 + 1.0).powf(0.75)))
            .map_err(|e| EmbeddingError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            context: Array2::zeros((index.len(), config.dimension)),
            neighbors,
            noise,
            learning_rate: config.learning_rate,
            negative_samples: config.negative_samples,
            walk_length: config.walk_length,
            walks_per_entity: config.walks_per_entity,
            window: config.window,
            p: config.p,
            q: config.q,
        })
    }

    /// node2vec second-order walk from `start`
    fn walk(&self, start: usize, rng: &mut StdRng) -> Vec<usize> {
        let mut walk = Vec::with_capacity(self.walk_length);
        walk.push(start);
        while walk.len() < self.walk_length {
            let current = walk[walk.len() - 1];
            let candidates = &self.neighbors[current];
            if candidates.is_empty() {
                break;
            }
            let next = if walk.len() == 1 {
                candidates[rng.gen_range(0..candidates.len())]
            } else {
                let prev = walk[walk.len() - 2];
                let weights = candidates.iter().map(|&x| {
                    if x == prev {
                        1.0 / self.p
                    } else if self.neighbors[prev].binary_search(&x).is_ok() {
                        1.0
                    } else {
                        1.0 / self.q
                    }
                });
                match WeightedIndex::new(weights) {
                    Ok(dist) => candidates[dist.sample(rng)],
                    Err(_) => candidates[rng.gen_range(0..candidates.len())],
                }
            };
            walk.push(next);
        }
        walk
    }

    fn train_pair(
        &mut self,
        vectors: &mut Array2<f32>,
        frozen: &[bool],
        center: usize,
        context: usize,
        rng: &mut StdRng,
    ) -> f64 {
        let mut grad = Array1::<f32>::zeros(vectors.ncols());
        let mut loss = 0.0;
        for k in 0..=self.negative_samples {
            let (target, label) = if k == 0 {
                (context, 1.0f32)
            } else {
                let sampled = self.noise.sample(rng);
                if sampled == context {
                    continue;
                }
                (sampled, 0.0)
            };
            let score = vectors.row(center).dot(&self.context.row(target));
            let sig = sigmoid(score);
            let p = if label > 0.5 { sig } else { 1.0 - sig };
            loss -= f64::from(p.max(1e-7)).ln();

            let g = self.learning_rate * (label - sig);
            grad.scaled_add(g, &self.context.row(target));
            self.context.row_mut(target).scaled_add(g, &vectors.row(center));
        }
        if !frozen[center] {
            vectors.row_mut(center).scaled_add(1.0, &grad);
        }
        loss
    }
}

impl EpochRunner for RandomWalkTrainer {
    fn run_epoch(
        &mut self,
        vectors: &mut Array2<f32>,
        frozen: &[bool],
        rng: &mut StdRng,
        interrupt: &dyn Fn() -> Option<TrainingStatus>,
    ) -> Result<f64, TrainingStatus> {
        let mut order: Vec<usize> = (0..self.neighbors.len()).collect();
        let mut total = 0.0;
        let mut pairs = 0usize;

        for _ in 0..self.walks_per_entity {
            order.shuffle(rng);
            for &start in &order {
                if let Some(stop) = interrupt() {
                    return Err(stop);
                }
                let walk = self.walk(start, rng);
                for (i, &center) in walk.iter().enumerate() {
                    let lo = i.saturating_sub(self.window);
                    let hi = (i + self.window + 1).min(walk.len());
                    for j in (lo..hi).filter(|&j| j != i) {
                        total += self.train_pair(vectors, frozen, center, walk[j], rng);
                        pairs += 1;
                    }
                }
            }
        }
        Ok(if pairs == 0 { 0.0 } else { total / pairs as f64 })
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-10.0, 10.0)).exp())
}

#[cfg(test)]
mod tests {
    use super::super::tests::two_clusters;
    use super::super::{Algorithm, CancelToken, EmbeddingConfig, EmbeddingTrainer};
    use super::*;

    #[test]
    fn test_walks_stay_on_edges() {
        let g = two_clusters();
        let ids: Vec<EntityId> = g.entity_ids().into_iter().collect();
        let index: HashMap<EntityId, usize> = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
        let trainer = RandomWalkTrainer::new(&g, &index, &EmbeddingConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let walk = trainer.walk(0, &mut rng);
        assert_eq!(walk.len(), 80);
        for pair in walk.windows(2) {
            assert!(trainer.neighbors[pair[0]].contains(&pair[1]));
        }
    }

    #[test]
    fn test_clusters_separate() {
        let g = two_clusters();
        let config = EmbeddingConfig {
            algorithm: Algorithm::RandomWalk,
            dimension: 16,
            epochs: 20,
            walk_length: 12,
            walks_per_entity: 6,
            window: 2,
            ..Default::default()
        };
        let model = EmbeddingTrainer::new(config)
            .unwrap()
            .train(&g, &CancelToken::new())
            .unwrap()
            .model;
        let id = |name: &str| g.find_by_name(name)[0].id.clone();
        let same = model.similarity(&id("a1"), &id("a2")).unwrap();
        let other = model.similarity(&id("a1"), &id("b1")).unwrap();
        assert!(same > other, "same cluster {} vs other cluster {}", same, other);
    }
}
