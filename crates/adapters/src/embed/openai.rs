//! OpenAI embeddings API adapter

use async_trait::async_trait;
use herald_domain::{EmbedError, Embedder};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedder backed by the `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, EmbedError> {
        Self::with_base_url(api_key, "https://api.openai.com/v1".to_string(), model)
    }

    pub fn with_base_url(
        api_key: SecretString,
        base_url: String,
        model: impl Into<String>,
    ) -> Result<Self, EmbedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbedError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions: None,
        })
    }

    /// Ask the API to shorten vectors to `dimensions`
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        if response.status() == 429 {
            return Err(EmbedError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api(format!("API returned {}: {}", status, body)));
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidFormat(e.to_string()))?;

        body.data.sort_by_key(|d| d.index);
        tracing::debug!(model = %self.model, count = body.data.len(), "Fetched embeddings");

        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer) -> OpenAiEmbedder {
        OpenAiEmbedder::with_base_url(
            SecretString::new("test-key".into()),
            server.uri(),
            "text-embedding-3-small",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_orders_by_index() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"],
                "dimensions": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "list",
                "data": [
                    { "object": "embedding", "index": 1, "embedding": [0.0, 1.0, 0.0] },
                    { "object": "embedding", "index": 0, "embedding": [1.0, 0.0, 0.0] }
                ],
                "model": "text-embedding-3-small"
            })))
            .mount(&mock_server)
            .await;

        let vectors = embedder(&mock_server)
            .with_dimensions(3)
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_embed_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let result = embedder(&mock_server).embed(&["x".to_string()]).await;
        assert!(matches!(result, Err(EmbedError::RateLimited)));

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let result = embedder(&mock_server).embed(&["x".to_string()]).await;
        assert!(matches!(result, Err(EmbedError::Api(msg)) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_empty_input_skips_request() {
        let mock_server = MockServer::start().await;
        let vectors = embedder(&mock_server).embed(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
