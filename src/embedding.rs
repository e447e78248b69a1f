//! Embedding client contract and implementations.
//!
//! The engine only needs one capability from an embedding backend: an
//! order-preserving batch call with a fixed declared dimension. That
//! contract is [`EmbeddingClient`]; concrete clients are:
//!
//! - **[`OpenAiClient`]** — OpenAI-compatible `POST /v1/embeddings` with
//!   batching, retry, and backoff.
//! - **[`OllamaClient`]** — a local Ollama instance's `/api/embed` endpoint.
//! - **[`DisabledClient`]** — returns errors; used when embeddings are not
//!   configured.
//!
//! # Retry strategy
//!
//! HTTP 429 and 5xx responses and network errors retry with exponential
//! backoff (1s, 2s, 4s, … capped at 32s); other 4xx responses fail fast.
//! [`embed_with_fallback`] additionally retries a failed batch one text at
//! a time before surfacing `EmbeddingFailure`, so one poisoned input does
//! not sink a whole batch.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

/// Batch embedding contract consumed by the indexing and retrieval
/// orchestrators.
///
/// Implementations must preserve order: output vector `i` embeds input
/// text `i`, and every vector has exactly `dims()` dimensions.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier, e.g. `"nomic-embed-text"`.
    fn model_name(&self) -> &str;

    /// Declared vector dimensionality.
    fn dims(&self) -> usize;

    /// Embeds a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embeds a batch, falling back to per-text calls when the batch fails.
pub async fn embed_with_fallback(
    client: &dyn EmbeddingClient,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    match client.embed_batch(texts).await {
        Ok(vectors) => Ok(vectors),
        Err(batch_err) => {
            eprintln!(
                "Warning: embedding batch of {} failed ({}), retrying per item",
                texts.len(),
                batch_err
            );
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                let mut single = client
                    .embed_batch(std::slice::from_ref(text))
                    .await
                    .map_err(|e| {
                        RagError::EmbeddingFailure(format!(
                            "batch and per-item embedding both failed: {}",
                            e
                        ))
                    })?;
                let vector = single.pop().ok_or_else(|| {
                    RagError::EmbeddingFailure("empty embedding response".to_string())
                })?;
                vectors.push(vector);
            }
            Ok(vectors)
        }
    }
}

/// Builds the configured client. Errors on unknown providers or missing
/// model/dims settings.
pub fn create_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiClient::new(config)?)),
        "ollama" => Ok(Box::new(OllamaClient::new(config)?)),
        "disabled" => Ok(Box::new(DisabledClient)),
        other => Err(RagError::InvalidInput(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config.model.clone().ok_or_else(|| {
        RagError::InvalidInput(format!(
            "embedding.model required for the {} provider",
            config.provider
        ))
    })
}

fn required_dims(config: &EmbeddingConfig) -> Result<usize> {
    config.dims.ok_or_else(|| {
        RagError::InvalidInput(format!(
            "embedding.dims required for the {} provider",
            config.provider
        ))
    })
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::EmbeddingFailure(format!("http client init failed: {}", e)))
}

/// Shared retry loop: POST a JSON body, parse on success, back off on
/// 429/5xx/network errors, fail fast on other client errors.
async fn post_with_backoff(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err: Option<RagError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json::<serde_json::Value>().await.map_err(|e| {
                        RagError::EmbeddingFailure(format!("invalid embedding response: {}", e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(RagError::EmbeddingFailure(format!(
                        "embedding endpoint error {}: {}",
                        status, body_text
                    )));
                    continue;
                }

                return Err(RagError::EmbeddingFailure(format!(
                    "embedding endpoint error {}: {}",
                    status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(RagError::EmbeddingFailure(format!(
                    "embedding endpoint unreachable at {}: {}",
                    url, e
                )));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| RagError::EmbeddingFailure("embedding failed after retries".into())))
}

fn check_response_shape(vectors: &[Vec<f32>], expected_len: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected_len {
        return Err(RagError::EmbeddingFailure(format!(
            "embedding response has {} vectors for {} inputs",
            vectors.len(),
            expected_len
        )));
    }
    for vector in vectors {
        if vector.len() != dims {
            return Err(RagError::EmbeddingFailure(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                dims
            )));
        }
    }
    Ok(())
}

// ============ Disabled ============

/// A no-op client that always errors. Indexing requires a real provider;
/// store-only commands (`init`, `get`, `stats`, `delete`) never embed.
pub struct DisabledClient;

#[async_trait]
impl EmbeddingClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingFailure(
            "embedding provider is disabled; set [embedding] in the config".to_string(),
        ))
    }
}

// ============ OpenAI-compatible ============

/// Client for OpenAI-compatible embedding endpoints.
///
/// Reads the API key from the `OPENAI_API_KEY` environment variable; the
/// endpoint defaults to the OpenAI API but any compatible base URL can be
/// configured, which is how self-hosted gateways are addressed.
pub struct OpenAiClient {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(RagError::InvalidInput(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }
        Ok(Self {
            model: required_model(config)?,
            dims: required_dims(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::InvalidInput("OPENAI_API_KEY not set".to_string()))?;
        let client = http_client(self.timeout_secs)?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = post_with_backoff(
            &client,
            &self.url,
            Some(&api_key),
            &body,
            self.max_retries,
        )
        .await?;

        let vectors = parse_openai_response(&json)?;
        check_response_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            RagError::EmbeddingFailure("invalid response: missing data array".to_string())
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                RagError::EmbeddingFailure("invalid response: missing embedding".to_string())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Ollama ============

/// Client for a local Ollama instance's `/api/embed` endpoint.
pub struct OllamaClient {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            dims: required_dims(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = http_client(self.timeout_secs)?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = post_with_backoff(&client, &url, None, &body, self.max_retries).await?;

        let vectors = parse_ollama_response(&json)?;
        check_response_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::EmbeddingFailure("invalid response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                RagError::EmbeddingFailure(
                    "invalid response: embedding is not an array".to_string(),
                )
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_openai_shape() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2], "index": 0 },
                { "embedding": [0.3, 0.4], "index": 1 },
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);

        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn parse_ollama_shape() {
        let json = serde_json::json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);

        assert!(parse_ollama_response(&serde_json::json!({"nope": 1})).is_err());
    }

    #[test]
    fn response_shape_checks() {
        let vectors = vec![vec![0.0f32; 4], vec![0.0f32; 4]];
        assert!(check_response_shape(&vectors, 2, 4).is_ok());
        assert!(check_response_shape(&vectors, 3, 4).is_err());
        assert!(check_response_shape(&vectors, 2, 8).is_err());
    }

    #[tokio::test]
    async fn disabled_client_always_errors() {
        let client = DisabledClient;
        let err = client.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), "embedding_failure");
    }
}
