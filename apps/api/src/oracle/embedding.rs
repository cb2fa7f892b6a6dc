//! Embedding oracle: text in, fixed-length vector out. Only the hybrid recompute path
//! uses it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{preview, OracleError};

pub const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[async_trait]
pub trait EmbeddingOracle: Send + Sync {
    /// Embeds every input; the result has one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OracleError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/v1/embeddings` client.
#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl EmbeddingClient {
    pub fn new(url: String, api_key: Option<String>, model: String) -> Result<Self, OracleError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingOracle for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OracleError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Embedding API returned {}: {}", status, preview(&body));
            return Err(OracleError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);
        if parsed.data.len() != texts.len() {
            return Err(OracleError::Unavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Cosine similarity clamped to [0, 1]; opposite or orthogonal vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        warn!(
            a_len = a.len(),
            b_len = b.len(),
            "embedding dimension mismatch; returning zero similarity"
        );
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
