//! TransE: head + relation ≈ tail under L2 distance with margin ranking

use super::{normalize_row, EmbeddingConfig, EpochRunner, TrainingStatus};
use crate::graph::{EntityId, KnowledgeGraph};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap, HashSet};

type Triple = (usize, usize, usize);

const CORRUPTION_ATTEMPTS: usize = 10;

pub(crate) struct TranslationTrainer {
    triples: Vec<Triple>,
    known: HashSet<Triple>,
    relations: Array2<f32>,
    entity_count: usize,
    learning_rate: f32,
    margin: f32,
    batch_size: usize,
}

impl TranslationTrainer {
    pub(crate) fn new(
        graph: &KnowledgeGraph,
        index: &HashMap<EntityId, usize>,
        config: &EmbeddingConfig,
        rng: &mut StdRng,
    ) -> Self {
        let mut records: Vec<_> = graph.relations().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut type_index: BTreeMap<&str, usize> = BTreeMap::new();
        for r in &records {
            type_index.entry(r.relation_type.as_str()).or_insert(0);
        }
        for (i, slot) in type_index.values_mut().enumerate() {
            *slot = i;
        }

        let triples: Vec<Triple> = records
            .iter()
            .filter_map(|r| {
                Some((
                    *index.get(&r.head)?,
                    *type_index.get(r.relation_type.as_str())?,
                    *index.get(&r.tail)?,
                ))
            })
            .collect();

        let dim = config.dimension;
        let bound = 6.0 / (dim as f32).sqrt();
        let mut relations = Array2::<f32>::zeros((type_index.len(), dim));
        for mut row in relations.rows_mut() {
            row.iter_mut().for_each(|v| *v = rng.gen_range(-bound..bound));
            normalize_row(&mut row);
        }

        Self {
            known: triples.iter().copied().collect(),
            triples,
            relations,
            entity_count: index.len(),
            learning_rate: config.learning_rate,
            margin: config.margin,
            batch_size: config.batch_size,
        }
    }

    fn corrupt(&self, (h, r, t): Triple, rng: &mut StdRng) -> Option<Triple> {
        if self.entity_count < 2 {
            return None;
        }
        for _ in 0..CORRUPTION_ATTEMPTS {
            let e = rng.gen_range(0..self.entity_count);
            let candidate = if rng.gen_bool(0.5) { (e, r, t) } else { (h, r, e) };
            if !self.known.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// h + r - t
    fn residual(&self, vectors: &Array2<f32>, (h, r, t): Triple) -> Array1<f32> {
        &vectors.row(h) + &self.relations.row(r) - &vectors.row(t)
    }

    /// Move the triple along `direction` (scaled by `step`): the head and
    /// relation get `-step`, the tail `+step`
    fn apply(&mut self, vectors: &mut Array2<f32>, frozen: &[bool], (h, r, t): Triple, direction: &Array1<f32>, step: f32) {
        if !frozen[h] {
            vectors.row_mut(h).scaled_add(-step, direction);
        }
        if !frozen[t] {
            vectors.row_mut(t).scaled_add(step, direction);
        }
        self.relations.row_mut(r).scaled_add(-step, direction);
    }

    fn train_triple(&mut self, vectors: &mut Array2<f32>, frozen: &[bool], positive: Triple, rng: &mut StdRng) -> f64 {
        let Some(negative) = self.corrupt(positive, rng) else {
            return 0.0;
        };
        let pos = self.residual(vectors, positive);
        let neg = self.residual(vectors, negative);
        let pos_dist = pos.dot(&pos).sqrt();
        let neg_dist = neg.dot(&neg).sqrt();
        let loss = self.margin + pos_dist - neg_dist;
        if loss <= 0.0 {
            return 0.0;
        }

        if pos_dist > f32::EPSILON {
            self.apply(vectors, frozen, positive, &(pos / pos_dist), self.learning_rate);
        }
        if neg_dist > f32::EPSILON {
            self.apply(vectors, frozen, negative, &(neg / neg_dist), -self.learning_rate);
        }

        for e in [positive.0, positive.2, negative.0, negative.2] {
            if !frozen[e] {
                normalize_row(&mut vectors.row_mut(e));
            }
        }
        f64::from(loss)
    }
}

impl EpochRunner for TranslationTrainer {
    fn run_epoch(
        &mut self,
        vectors: &mut Array2<f32>,
        frozen: &[bool],
        rng: &mut StdRng,
        interrupt: &dyn Fn() -> Option<TrainingStatus>,
    ) -> Result<f64, TrainingStatus> {
        if self.triples.is_empty() {
            return Ok(0.0);
        }
        let mut order: Vec<usize> = (0..self.triples.len()).collect();
        order.shuffle(rng);

        let mut total = 0.0;
        for batch in order.chunks(self.batch_size) {
            if let Some(stop) = interrupt() {
                return Err(stop);
            }
            for &i in batch {
                let triple = self.triples[i];
                total += self.train_triple(vectors, frozen, triple, rng);
            }
        }
        Ok(total / self.triples.len() as f64)
    }
}
