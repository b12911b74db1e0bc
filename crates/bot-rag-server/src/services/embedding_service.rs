use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::services::providers::EmbeddingProvider;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    content: &'a str,
    // Send both for compatibility
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// HTTP client for an OpenAI or llama.cpp compatible `/embedding` endpoint.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create embedding HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            content: text,
            input: text,
            model: (!self.model.is_empty()).then_some(self.model.as_str()),
        };

        let url = format!("{}/embedding", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding_response(&json_value)?;
        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }
}

fn floats(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Accepts `{"embedding": [...]}`, `{"data": [{"embedding": [...]}]}`,
/// `[{"embedding": [...]}]` and a bare `[...]`.
fn parse_embedding_response(json_value: &Value) -> Result<Vec<f32>> {
    let embedding = match json_value {
        Value::Array(arr) => match arr.first() {
            None => anyhow::bail!("Empty array returned from embedding server"),
            Some(first) => match first.get("embedding").and_then(Value::as_array) {
                Some(inner) => floats(inner),
                None => floats(arr),
            },
        },
        Value::Object(obj) => {
            if let Some(direct) = obj.get("embedding").and_then(Value::as_array) {
                floats(direct)
            } else if let Some(inner) = obj
                .get("data")
                .and_then(Value::as_array)
                .and_then(|data| data.first())
                .and_then(|item| item.get("embedding"))
                .and_then(Value::as_array)
            {
                floats(inner)
            } else {
                anyhow::bail!("Unrecognized embedding response format: {}", json_value);
            }
        }
        _ => anyhow::bail!("Unrecognized embedding response format: {}", json_value),
    };

    if embedding.is_empty() {
        anyhow::bail!("Generated embedding is empty");
    }
    Ok(embedding)
}

#[async_trait::async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request_embedding(text).await
    }
}
