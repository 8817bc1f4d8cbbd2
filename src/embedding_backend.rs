//! Client for OpenAI-compatible embedding APIs
//!
//! One call is one HTTP request. Retrying is left to the caller's
//! [`RetryPolicy`](crate::retry::RetryPolicy); this client only classifies
//! what went wrong.

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Data { data: Vec<EmbeddingData> },
    Embeddings { embeddings: Vec<Vec<f32>> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingResponse {
    /// Vectors in request order
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Data { mut data } => {
                if data.iter().all(|d| d.index.is_some()) {
                    data.sort_by_key(|d| d.index);
                }
                data.into_iter().map(|d| d.embedding).collect()
            }
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
        }
    }
}

pub struct EmbeddingBackendClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl EmbeddingBackendClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid embedding API URL: {}", e)))
    }

    /// `POST v1/embeddings`; vectors come back in input order
    pub async fn embed_text(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("v1/embeddings")?;
        let mut request = self.client.post(url).json(&EmbeddingRequest {
            model,
            input: inputs,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        trace!(inputs = inputs.len(), "Embedding request");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status, &body, retry_after));
        }

        let body = response.text().await?;
        let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Embedding(format!("Malformed embedding response: {}", e))
        })?;
        let embeddings = parsed.into_embeddings();

        if embeddings.len() != inputs.len() {
            return Err(Error::Embedding(format!(
                "Embedding API returned {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            )));
        }
        Ok(embeddings)
    }
}

/// `Retry-After` in delta-seconds form. Values too large for a `Duration`
/// saturate; the retry policy caps them.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| !secs.is_nan() && *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}
