use super::{BoundingBox, ExtractedContent, ExtractionSource, Extractor, ObjectStructure, RawObject};
use crate::backend::{BackendClient, RetryPolicy};
use crate::error::{Error, Result};
use crate::meta::ObjectType;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    document_type: &'a str,
    model_profile: &'a str,
    filename: String,
    content_base64: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    page_count: usize,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    objects: Vec<ExtractedObjectWire>,
}

#[derive(Debug, Deserialize)]
struct ExtractedObjectWire {
    object_type: ObjectType,
    page_no: u32,
    #[serde(default)]
    sequence_in_page: Option<u32>,
    #[serde(default)]
    bbox: Option<BoundingBox>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    structure: Option<ObjectStructure>,
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    image_mime: Option<String>,
}

fn extension_for_mime(mime: &str) -> Option<String> {
    mime_guess::get_mime_extensions_str(mime)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{}", ext))
}

/// Client for a layout-extraction sidecar
pub struct HttpExtractor {
    client: BackendClient,
}

impl HttpExtractor {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: BackendClient::new(base_url, timeout, retry, "extraction")?,
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn provider(&self) -> &str {
        "http"
    }

    async fn extract(&self, source: &ExtractionSource) -> Result<ExtractedContent> {
        let bytes = tokio::fs::read(&source.path).await?;
        let request = ExtractRequest {
            document_type: &source.document_type,
            model_profile: &source.model_profile,
            filename: source
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            content_base64: STANDARD.encode(&bytes),
        };

        let response: ExtractResponse = self.client.post_json("/v1/extract", &request).await?;

        let mut sequences: std::collections::HashMap<u32, u32> = Default::default();
        let mut objects = Vec::with_capacity(response.objects.len());
        for wire in response.objects {
            if wire.page_no == 0 || wire.page_no as usize > response.page_count {
                return Err(Error::Extraction(format!(
                    "Object on page {} outside document of {} pages",
                    wire.page_no, response.page_count
                )));
            }
            let next = sequences.entry(wire.page_no).or_insert(0);
            let sequence_in_page = wire.sequence_in_page.unwrap_or(*next);
            *next = sequence_in_page + 1;

            let image = wire
                .image_base64
                .as_deref()
                .map(|data| STANDARD.decode(data))
                .transpose()
                .map_err(|e| Error::Extraction(format!("Invalid image payload: {}", e)))?;

            objects.push(RawObject {
                object_type: wire.object_type,
                page_no: wire.page_no,
                sequence_in_page,
                bbox: wire.bbox,
                text: wire.text,
                structure: wire.structure,
                image_ext: wire.image_mime.as_deref().and_then(extension_for_mime),
                image,
            });
        }

        debug!(
            path = %source.path.display(),
            pages = response.page_count,
            objects = objects.len(),
            "Extraction backend returned objects"
        );

        Ok(ExtractedContent {
            title: response.title,
            page_count: response.page_count,
            objects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn run_against(body: serde_json::Value) -> Result<ExtractedContent> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("paper.pdf");
        std::fs::write(&file, b"%PDF-1.7").unwrap();

        let extractor =
            HttpExtractor::new(&server.uri(), Duration::from_secs(5), RetryPolicy::none())
                .unwrap();
        extractor
            .extract(&ExtractionSource {
                path: file,
                document_type: "pdf".to_string(),
                model_profile: "default".to_string(),
            })
            .await
    }

    #[tokio::test]
    async fn test_decodes_objects() {
        let content = run_against(json!({
            "page_count": 2,
            "title": "Paper",
            "objects": [
                { "object_type": "TEXT", "page_no": 1, "text": "Abstract" },
                { "object_type": "TEXT", "page_no": 1, "text": "Intro" },
                {
                    "object_type": "TABLE", "page_no": 2,
                    "structure": { "kind": "table", "header": ["a"], "rows": [["1"]] }
                },
                {
                    "object_type": "IMAGE", "page_no": 2,
                    "image_base64": STANDARD.encode(b"png-bytes"),
                    "image_mime": "image/png",
                    "bbox": { "x0": 0.0, "y0": 0.0, "x1": 10.0, "y1": 10.0 }
                }
            ]
        }))
        .await
        .unwrap();

        assert_eq!(content.page_count, 2);
        assert_eq!(content.objects.len(), 4);
        assert_eq!(content.objects[1].sequence_in_page, 1);
        assert_eq!(content.objects[2].sequence_in_page, 0);
        assert!(content.objects[2].structure.as_ref().unwrap().render_table().is_some());
        assert_eq!(content.objects[3].image.as_deref(), Some(&b"png-bytes"[..]));
        assert_eq!(content.objects[3].image_ext.as_deref(), Some(".png"));
    }

    #[tokio::test]
    async fn test_rejects_object_outside_page_range() {
        let result = run_against(json!({
            "page_count": 1,
            "objects": [{ "object_type": "TEXT", "page_no": 3, "text": "stray" }]
        }))
        .await;
        assert!(matches!(result, Err(Error::Extraction(_))));
    }
}
