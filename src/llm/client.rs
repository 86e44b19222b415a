//! Remote model client for various LLM providers

use super::{LanguageModel, LlmError, LlmResult};
use crate::config::{LlmConfig, LlmProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You extract knowledge graphs and answer questions strictly from the supplied context.";

/// Client for chat completion and embedding APIs
pub struct HttpLanguageModel {
    client: Client,
    config: LlmConfig,
    api_base_url: String,
    label: String,
}

impl HttpLanguageModel {
    pub fn new(config: &LlmConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        let api_base_url = config.api_base_url.clone().unwrap_or_else(|| match config.provider {
            LlmProvider::OpenAI => "https://api.openai.com/v1".to_string(),
            LlmProvider::Ollama => "http://localhost:11434".to_string(),
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta".to_string(),
        });

        Ok(Self {
            client,
            label: format!("{:?}/{}", config.provider, config.model),
            config: config.clone(),
            api_base_url,
        })
    }

    fn system_prompt(&self) -> String {
        self.config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Config(format!("{:?} requires an API key", self.config.provider)))
    }

    async fn openai_chat(&self, prompt: &str) -> LlmResult<String> {
        #[derive(Serialize)]
        struct Message {
            role: String,
            content: String,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<Message>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MessageContent,
        }

        #[derive(Deserialize)]
        struct MessageContent {
            content: String,
        }

        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&Request {
                model: &self.config.model,
                messages: vec![
                    Message {
                        role: "system".to_string(),
                        content: self.system_prompt(),
                    },
                    Message {
                        role: "user".to_string(),
                        content: prompt.to_string(),
                    },
                ],
                temperature: 0.0,
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("OpenAI returned error: {}", error_text)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(result
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    async fn ollama_chat(&self, prompt: &str) -> LlmResult<String> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: &'a str,
            system: String,
            stream: bool,
        }

        #[derive(Deserialize)]
        struct Response {
            response: String,
        }

        let url = format!("{}/api/generate", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .json(&Request {
                model: &self.config.model,
                prompt,
                system: self.system_prompt(),
                stream: false,
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Api(format!("Ollama error: {}", resp.status())));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(result.response)
    }

    async fn gemini_chat(&self, prompt: &str) -> LlmResult<String> {
        #[derive(Serialize)]
        struct Request {
            contents: Vec<Content>,
            #[serde(rename = "generationConfig")]
            generation_config: GenerationConfig,
        }

        #[derive(Serialize, Deserialize)]
        struct Content {
            role: Option<String>,
            parts: Vec<Part>,
        }

        #[derive(Serialize, Deserialize)]
        struct Part {
            text: String,
        }

        #[derive(Serialize)]
        struct GenerationConfig {
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Response {
            candidates: Option<Vec<Candidate>>,
        }

        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }

        let api_key = self.api_key()?;
        // v1beta has no system role on every endpoint, so the instruction is prepended
        let full_prompt = format!("{}\n\n{}", self.system_prompt(), prompt);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base_url, self.config.model, api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&Request {
                contents: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part { text: full_prompt }],
                }],
                generation_config: GenerationConfig { temperature: 0.0 },
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Gemini error: {}", text)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(result
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default())
    }

    async fn openai_embeddings(&self, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct Request<'a> {
            input: &'a [String],
            model: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            data: Vec<Data>,
        }

        #[derive(Deserialize)]
        struct Data {
            embedding: Vec<f32>,
        }

        let api_key = self.api_key()?;
        let url = format!("{}/embeddings", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&Request {
                input: texts,
                model: &self.config.embedding_model,
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("OpenAI returned error: {}", error_text)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn ollama_embeddings(&self, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.api_base_url);
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            let resp = self
                .client
                .post(&url)
                .json(&Request {
                    model: &self.config.embedding_model,
                    prompt: text,
                })
                .send()
                .await
                .map_err(|e| LlmError::Network(e.to_string()))?;

            if !resp.status().is_success() {
                let error_text = resp.text().await.unwrap_or_default();
                return Err(LlmError::Api(format!("Ollama returned error: {}", error_text)));
            }

            let result: Response = resp
                .json()
                .await
                .map_err(|e| LlmError::Serialization(e.to_string()))?;
            results.push(result.embedding);
        }
        Ok(results)
    }

    async fn gemini_embeddings(&self, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct BatchRequest<'a> {
            requests: Vec<EmbedRequest<'a>>,
        }

        #[derive(Serialize)]
        struct EmbedRequest<'a> {
            model: String,
            content: EmbedContent<'a>,
        }

        #[derive(Serialize)]
        struct EmbedContent<'a> {
            parts: Vec<EmbedPart<'a>>,
        }

        #[derive(Serialize)]
        struct EmbedPart<'a> {
            text: &'a str,
        }

        #[derive(Deserialize)]
        struct BatchResponse {
            embeddings: Vec<Embedding>,
        }

        #[derive(Deserialize)]
        struct Embedding {
            values: Vec<f32>,
        }

        let api_key = self.api_key()?;
        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.api_base_url, self.config.embedding_model, api_key
        );
        let requests = texts
            .iter()
            .map(|t| EmbedRequest {
                model: format!("models/{}", self.config.embedding_model),
                content: EmbedContent {
                    parts: vec![EmbedPart { text: t }],
                },
            })
            .collect();

        let resp = self
            .client
            .post(&url)
            .json(&BatchRequest { requests })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Gemini returned error: {}", error_text)));
        }

        let result: BatchResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(result.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        debug!(model = %self.label, prompt_len = prompt.len(), "Requesting completion");
        match self.config.provider {
            LlmProvider::OpenAI => self.openai_chat(prompt).await,
            LlmProvider::Ollama => self.ollama_chat(prompt).await,
            LlmProvider::Gemini => self.gemini_chat(prompt).await,
        }
    }

    async fn embed(&self, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.label, count = texts.len(), "Requesting embeddings");
        match self.config.provider {
            LlmProvider::OpenAI => self.openai_embeddings(texts).await,
            LlmProvider::Ollama => self.ollama_embeddings(texts).await,
            LlmProvider::Gemini => self.gemini_embeddings(texts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_urls() {
        let mut config = LlmConfig::default();
        config.provider = LlmProvider::Ollama;
        let model = HttpLanguageModel::new(&config).unwrap();
        assert_eq!(model.api_base_url, "http://localhost:11434");
        assert!(model.name().starts_with("Ollama/"));
    }

    #[tokio::test]
    async fn test_openai_requires_key() {
        let model = HttpLanguageModel::new(&LlmConfig::default()).unwrap();
        let err = model.complete("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }
}
