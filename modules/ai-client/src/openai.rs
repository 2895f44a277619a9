use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AiError;
use crate::traits::{ChatModel, EmbedModel};
use crate::util::extract_json_object;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any OpenAI-compatible API (chat completions + embeddings).
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            embedding_model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, AiError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AiError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|err| AiError::InvalidResponse(err.to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl ChatModel for OpenAi {
    async fn chat_json(&self, system: &str, user: &str) -> Result<serde_json::Value, AiError> {
        debug!(model = self.model.as_str(), "Chat completion request");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let body = self.post_json("/chat/completions", &request).await?;
        let content = body["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| AiError::InvalidResponse("empty choices".to_string()))?;

        extract_json_object(content)
            .ok_or_else(|| AiError::InvalidResponse("response is not a JSON object".to_string()))
    }
}

#[async_trait]
impl EmbedModel for OpenAi {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            model = self.embedding_model.as_str(),
            batch = texts.len(),
            "Embedding request"
        );

        let body = self
            .post_json(
                "/embeddings",
                &serde_json::json!({
                    "model": self.embedding_model,
                    "input": texts,
                }),
            )
            .await?;

        let mut data: Vec<EmbeddingData> = serde_json::from_value(body["data"].clone())
            .map_err(|err| AiError::InvalidResponse(format!("embedding payload: {err}")))?;
        data.sort_by_key(|item| item.index);

        if data.len() != texts.len() {
            return Err(AiError::InvalidResponse(format!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                data.len()
            )));
        }

        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}
