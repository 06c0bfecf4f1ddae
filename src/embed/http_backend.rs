use super::{Embedder, ImageEmbedInput};
use crate::backend::{BackendClient, RetryPolicy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ImageTextInput {
    pub image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct EmbedTextRequest<'a> {
    model: &'a str,
    inputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct EmbedImageTextRequest<'a> {
    model: &'a str,
    inputs: Vec<ImageTextInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

pub struct HttpEmbedder {
    client: BackendClient,
    model_id: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model_id: &str,
        dimension: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            client: BackendClient::new(base_url, timeout, retry, "embedding")?,
            model_id: model_id.to_string(),
            dimension,
        })
    }

    fn validate(&self, expected_count: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != expected_count {
            return Err(Error::Embedding(format!(
                "Backend returned {} embeddings for {} inputs",
                embeddings.len(),
                expected_count
            )));
        }
        if let Some(mismatch) = embeddings.iter().find(|vec| vec.len() != self.dimension) {
            return Err(Error::Schema(format!(
                "model '{}' produced {} dimensions, expected {}",
                self.model_id,
                mismatch.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    async fn encode_image(input: ImageEmbedInput) -> Result<ImageTextInput> {
        let bytes = tokio::fs::read(&input.image_path).await.map_err(|e| {
            Error::Embedding(format!("Failed to read image '{}': {}", input.image_path, e))
        })?;
        Ok(ImageTextInput {
            image_base64: STANDARD.encode(bytes),
            image_mime: mime_guess::from_path(&input.image_path)
                .first()
                .map(|m| m.essence_str().to_string()),
            text: input.text,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let count = texts.len();
        let request = EmbedTextRequest {
            model: &self.model_id,
            inputs: texts,
        };
        let response: EmbeddingResponse = self.client.post_json("/v1/embed/text", &request).await?;
        let embeddings = response.into_embeddings();
        self.validate(count, &embeddings)?;
        Ok(embeddings)
    }

    async fn embed_images(&self, inputs: Vec<ImageEmbedInput>) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let count = inputs.len();
        let mut encoded = Vec::with_capacity(count);
        for input in inputs {
            encoded.push(Self::encode_image(input).await?);
        }

        let request = EmbedImageTextRequest {
            model: &self.model_id,
            inputs: encoded,
        };
        let response: EmbeddingResponse = self
            .client
            .post_json("/v1/embed/image_text", &request)
            .await?;
        let embeddings = response.into_embeddings();
        self.validate(count, &embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phash::tests::gradient_png;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer, dimension: usize) -> HttpEmbedder {
        HttpEmbedder::new(
            &server.uri(),
            "test-model",
            dimension,
            Duration::from_secs(5),
            RetryPolicy::new(1, 1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_text_response_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .and(body_partial_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3] }, { "embedding": [0.3, 0.2, 0.1] }]
            })))
            .mount(&server)
            .await;

        let vectors = embedder(&server, 3)
            .embed(vec!["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.3, 0.2, 0.1]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_schema_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.1, 0.2]] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = embedder(&server, 3).embed(vec!["a".into()]).await;
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[tokio::test]
    async fn test_embed_images_sends_base64() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/image_text"))
            .and(body_partial_json(json!({
                "inputs": [{ "image_mime": "image/png", "text": "a chart" }]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "vectors": [[1.0, 0.0]] })),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("chart.png");
        std::fs::write(&image, gradient_png(8, 8)).unwrap();

        let vectors = embedder(&server, 2)
            .embed_images(vec![ImageEmbedInput {
                image_path: image.to_string_lossy().to_string(),
                text: Some("a chart".to_string()),
            }])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0]]);
    }
}
