//! In-process extraction for plain text, markdown and image files

use super::{ExtractedContent, ExtractionSource, Extractor, ObjectStructure, RawObject};
use crate::error::{Error, Result};
use crate::meta::ObjectType;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

const PAGE_BREAK: char = '\u{000C}';

static IMAGE_REF: OnceLock<Option<Regex>> = OnceLock::new();

fn image_ref() -> Option<&'static Regex> {
    IMAGE_REF
        .get_or_init(|| Regex::new(r"^!\[(?P<caption>[^\]]*)\]\((?P<path>[^)\s]+)\)$").ok())
        .as_ref()
}

/// Extractor for text, markdown and image files
#[derive(Debug, Default)]
pub struct LocalExtractor;

impl LocalExtractor {
    pub fn new() -> Self {
        Self
    }

    async fn extract_image(&self, path: &Path) -> Result<ExtractedContent> {
        let bytes = tokio::fs::read(path).await?;
        let ext = extension_of(path);
        let object = RawObject {
            object_type: ObjectType::Image,
            page_no: 1,
            sequence_in_page: 0,
            bbox: None,
            text: None,
            structure: Some(ObjectStructure::Image {
                caption: None,
                format: ext.as_deref().map(|e| e.trim_start_matches('.').to_string()),
            }),
            image: Some(bytes),
            image_ext: ext,
        };
        Ok(ExtractedContent {
            title: path.file_stem().map(|s| s.to_string_lossy().to_string()),
            page_count: 1,
            objects: vec![object],
        })
    }

    async fn image_object(
        &self,
        base_dir: &Path,
        page_no: u32,
        sequence_in_page: u32,
        caption: &str,
        target: &str,
    ) -> RawObject {
        let caption = (!caption.trim().is_empty()).then(|| caption.trim().to_string());
        let path = base_dir.join(target);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let ext = extension_of(&path);
                RawObject {
                    object_type: ObjectType::Image,
                    page_no,
                    sequence_in_page,
                    bbox: None,
                    text: caption.clone(),
                    structure: Some(ObjectStructure::Image {
                        caption,
                        format: ext.as_deref().map(|e| e.trim_start_matches('.').to_string()),
                    }),
                    image: Some(bytes),
                    image_ext: ext,
                }
            }
            Err(e) => {
                // Keep the caption as a figure reference without pixels
                warn!(path = %path.display(), "Image not readable, keeping as figure: {}", e);
                RawObject {
                    object_type: ObjectType::Figure,
                    page_no,
                    sequence_in_page,
                    bbox: None,
                    text: caption.clone(),
                    structure: Some(ObjectStructure::Image {
                        caption,
                        format: None,
                    }),
                    image: None,
                    image_ext: None,
                }
            }
        }
    }
}

#[async_trait]
impl Extractor for LocalExtractor {
    fn provider(&self) -> &str {
        "local"
    }

    async fn extract(&self, source: &ExtractionSource) -> Result<ExtractedContent> {
        if source.document_type == "image" {
            return self.extract_image(&source.path).await;
        }

        let content = tokio::fs::read_to_string(&source.path).await.map_err(|e| {
            Error::Extraction(format!(
                "Failed to read '{}': {}",
                source.path.display(),
                e
            ))
        })?;
        let base_dir = source.path.parent().unwrap_or_else(|| Path::new("."));

        let pages: Vec<&str> = content.split(PAGE_BREAK).collect();
        let mut objects = Vec::new();

        for (page_idx, page) in pages.iter().enumerate() {
            let page_no = page_idx as u32 + 1;
            let mut sequence = 0u32;

            for block in split_blocks(page) {
                let object = if let Some(table) = parse_pipe_table(&block) {
                    RawObject {
                        object_type: ObjectType::Table,
                        page_no,
                        sequence_in_page: sequence,
                        bbox: None,
                        text: Some(block.clone()),
                        structure: Some(table),
                        image: None,
                        image_ext: None,
                    }
                } else if let Some(caps) = image_ref().and_then(|re| re.captures(block.trim())) {
                    let caption = caps.name("caption").map(|m| m.as_str()).unwrap_or("");
                    let target = caps.name("path").map(|m| m.as_str()).unwrap_or("");
                    self.image_object(base_dir, page_no, sequence, caption, target)
                        .await
                } else {
                    RawObject::text(page_no, sequence, block)
                };
                objects.push(object);
                sequence += 1;
            }
        }

        debug!(
            path = %source.path.display(),
            pages = pages.len(),
            objects = objects.len(),
            "Extracted local document"
        );

        Ok(ExtractedContent {
            title: markdown_title(&content),
            page_count: pages.len(),
            objects,
        })
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// First level-one heading
fn markdown_title(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Blank-line separated blocks of a page, trimmed, empty blocks skipped
fn split_blocks(page: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in page.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim().trim_start_matches('|').trim_end_matches('|');
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|cell| {
            !cell.is_empty() && cell.chars().all(|c| c == '-' || c == ':') && cell.contains('-')
        })
}

/// Parse a block made only of `|`-delimited lines. The first row is the
/// header when followed by a `---` separator.
fn parse_pipe_table(block: &str) -> Option<ObjectStructure> {
    let lines: Vec<&str> = block.lines().collect();
    if lines.len() < 2 || !lines.iter().all(|l| l.trim_start().starts_with('|')) {
        return None;
    }

    let rows: Vec<Vec<String>> = lines.iter().map(|l| split_cells(l)).collect();
    if is_separator_row(&rows[1]) {
        let header = rows[0].clone();
        let body = rows.into_iter().skip(2).collect();
        Some(ObjectStructure::Table { header, rows: body })
    } else {
        Some(ObjectStructure::Table {
            header: Vec::new(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phash::tests::gradient_png;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn source(path: PathBuf, document_type: &str) -> ExtractionSource {
        ExtractionSource {
            path,
            document_type: document_type.to_string(),
            model_profile: "default".to_string(),
        }
    }

    #[test]
    fn test_parse_pipe_table() {
        let table = parse_pipe_table("| model | params |\n|---|:---:|\n| BERT | 110M |").unwrap();
        assert_eq!(
            table,
            ObjectStructure::Table {
                header: vec!["model".into(), "params".into()],
                rows: vec![vec!["BERT".into(), "110M".into()]],
            }
        );
        assert!(parse_pipe_table("| lonely line |").is_none());
        assert!(parse_pipe_table("plain\ntext").is_none());
    }

    #[test]
    fn test_split_blocks() {
        let blocks = split_blocks("first para\nsame para\n\n\n  \nsecond");
        assert_eq!(blocks, vec!["first para\nsame para".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_extract_markdown_pages_and_objects() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("fig.png"), gradient_png(16, 16)).unwrap();
        let doc = "# Survey\n\nTransformers changed NLP.\n\u{000C}| a | b |\n| --- | --- |\n| 1 | 2 |\n\n![Attention map](fig.png)\n\n![Missing](nope.png)";
        let path = tmp.path().join("survey.md");
        std::fs::write(&path, doc).unwrap();

        let content = LocalExtractor::new()
            .extract(&source(path, "markdown"))
            .await
            .unwrap();

        assert_eq!(content.title.as_deref(), Some("Survey"));
        assert_eq!(content.page_count, 2);
        let types: Vec<ObjectType> = content.objects.iter().map(|o| o.object_type).collect();
        assert_eq!(
            types,
            vec![
                ObjectType::Text,
                ObjectType::Text,
                ObjectType::Table,
                ObjectType::Image,
                ObjectType::Figure
            ]
        );

        let image = &content.objects[3];
        assert_eq!(image.page_no, 2);
        assert_eq!(image.sequence_in_page, 1);
        assert_eq!(image.text.as_deref(), Some("Attention map"));
        assert_eq!(image.image_ext.as_deref(), Some(".png"));
        assert!(image.image.is_some());

        let figure = &content.objects[4];
        assert!(figure.image.is_none());
        assert_eq!(figure.text.as_deref(), Some("Missing"));
    }

    #[tokio::test]
    async fn test_extract_standalone_image() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scan.png");
        std::fs::write(&path, gradient_png(8, 8)).unwrap();

        let content = LocalExtractor::new()
            .extract(&source(path, "image"))
            .await
            .unwrap();
        assert_eq!(content.page_count, 1);
        assert_eq!(content.objects.len(), 1);
        assert_eq!(content.objects[0].object_type, ObjectType::Image);
        assert_eq!(content.title.as_deref(), Some("scan"));
    }

    #[tokio::test]
    async fn test_missing_file_is_extraction_error() {
        let tmp = TempDir::new().unwrap();
        let result = LocalExtractor::new()
            .extract(&source(tmp.path().join("absent.txt"), "text"))
            .await;
        assert!(matches!(result, Err(Error::Extraction(_))));
    }
}
