//! Deterministic offline model
//!
//! Embeddings are feature-hashed bags of words, so texts sharing terms have
//! a positive cosine. Completions come from registered triggers or fall
//! back to echoing the supplied context.

use super::{LanguageModel, LlmResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub const DEFAULT_DIMENSION: usize = 64;

#[derive(Debug, Clone)]
pub struct HashingLanguageModel {
    dimension: usize,
    responses: Vec<(String, String)>,
}

impl Default for HashingLanguageModel {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingLanguageModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            responses: Vec::new(),
        }
    }

    /// Answer any prompt containing `trigger` with `response`. The first
    /// registered trigger that matches wins.
    pub fn with_response(mut self, trigger: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((trigger.into(), response.into()));
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Hash each lowercase alphanumeric token into a signed bucket
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize % self.dimension;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl LanguageModel for HashingLanguageModel {
    fn name(&self) -> &str {
        "hashing-stub"
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        if let Some((_, response)) = self.responses.iter().find(|(t, _)| prompt.contains(t.as_str())) {
            return Ok(response.clone());
        }
        // Echo whatever follows the context marker, which keeps answers grounded
        let context = prompt
            .split_once("Context:")
            .map(|(_, rest)| rest.split("Question:").next().unwrap_or(rest).trim())
            .unwrap_or("");
        if context.is_empty() {
            Ok("No relevant context found.".to_string())
        } else {
            Ok(format!("Based on the context: {}", context))
        }
    }

    async fn embed(&self, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embeddings_are_deterministic_and_normalized() {
        let model = HashingLanguageModel::default();
        let texts = vec!["Beijing is the capital of China".to_string()];
        let a = model.embed(&texts).await.unwrap();
        let b = model.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_terms_are_closer() {
        let model = HashingLanguageModel::new(128);
        let q = model.embed_one("capital of China");
        let near = model.embed_one("Beijing is the capital of China");
        let far = model.embed_one("Tsinghua University campus library");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[tokio::test]
    async fn test_canned_and_default_completions() {
        let model = HashingLanguageModel::default().with_response("Extract", "[]");
        assert_eq!(model.complete("Extract entities").await.unwrap(), "[]");
        let answer = model
            .complete("Context:\nBeijing is a city.\nQuestion: what?")
            .await
            .unwrap();
        assert!(answer.contains("Beijing is a city."));
        assert_eq!(model.complete("hi").await.unwrap(), "No relevant context found.");
    }
}
