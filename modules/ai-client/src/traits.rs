use async_trait::async_trait;

use crate::error::AiError;

/// A chat model constrained to structured JSON-object output.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send a system + user prompt and parse the response body as one JSON
    /// object. Malformed output surfaces as [`AiError::InvalidResponse`].
    async fn chat_json(&self, system: &str, user: &str) -> Result<serde_json::Value, AiError>;
}

/// A text-embedding model returning one vector per input text.
#[async_trait]
pub trait EmbedModel: Send + Sync {
    /// Embed a batch of texts. The result has exactly one vector per input,
    /// in input order; a count mismatch is an error, never truncated.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError>;
}
