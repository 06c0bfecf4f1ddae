//! Token-bounded context assembly

use crate::chunk::estimate_tokens;
use crate::index::SearchChunk;

/// The assembled context and how much of the ranked list it used
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Number of leading ranked chunks included
    pub chunks_used: usize,
    pub tokens: usize,
}

/// Header line naming a chunk's source
pub fn chunk_header(chunk: &SearchChunk) -> String {
    let source = chunk
        .metadata
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(&chunk.document_id);
    match chunk.metadata.page_no {
        Some(page) => format!("{} (p. {}, {})", source, page, chunk.modality),
        None => format!("{} ({})", source, chunk.modality),
    }
}

/// Append chunks in ranked order as `[n] header\ncontent\n\n`.
///
/// Headers count against the budget. The first chunk that would exceed
/// `max_tokens` ends assembly; chunks are never cut.
pub fn assemble_context<'a>(
    ranked: impl IntoIterator<Item = &'a SearchChunk>,
    max_chunks: usize,
    max_tokens: usize,
) -> AssembledContext {
    let mut context = AssembledContext::default();

    for chunk in ranked.into_iter().take(max_chunks) {
        let entry = format!(
            "[{}] {}\n{}\n\n",
            context.chunks_used + 1,
            chunk_header(chunk),
            chunk.content
        );
        let tokens = estimate_tokens(&entry);
        if context.tokens + tokens > max_tokens {
            break;
        }
        context.text.push_str(&entry);
        context.tokens += tokens;
        context.chunks_used += 1;
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkMetadata;
    use crate::meta::Modality;

    fn chunk(id: &str, content: &str) -> SearchChunk {
        SearchChunk {
            chunk_id: id.to_string(),
            document_id: format!("doc-{}", id),
            content: content.to_string(),
            score: 1.0,
            modality: Modality::Text,
            metadata: ChunkMetadata {
                page_no: Some(2),
                title: Some("Attention Survey".to_string()),
            },
        }
    }

    #[test]
    fn test_format() {
        let chunks = vec![chunk("a", "first body"), chunk("b", "second body")];
        let context = assemble_context(&chunks, 10, 1000);
        assert_eq!(context.chunks_used, 2);
        assert_eq!(
            context.text,
            "[1] Attention Survey (p. 2, text)\nfirst body\n\n[2] Attention Survey (p. 2, text)\nsecond body\n\n"
        );
        assert_eq!(context.tokens, estimate_tokens(&context.text));
    }

    #[test]
    fn test_budget_stops_without_truncating() {
        let long = "word ".repeat(200);
        let chunks = vec![chunk("a", "short"), chunk("b", &long), chunk("c", "tiny")];
        let context = assemble_context(&chunks, 10, 50);

        // The oversized chunk ends assembly even though a later one would fit
        assert_eq!(context.chunks_used, 1);
        assert!(context.tokens <= 50);
        assert!(!context.text.contains("word"));
        assert!(!context.text.contains("tiny"));
    }

    #[test]
    fn test_max_chunks() {
        let chunks: Vec<SearchChunk> = (0..5).map(|i| chunk(&i.to_string(), "body")).collect();
        let context = assemble_context(&chunks, 3, 10_000);
        assert_eq!(context.chunks_used, 3);
        assert!(context.text.starts_with("[1]"));
        assert!(context.text.contains("[3]"));
        assert!(!context.text.contains("[4]"));
    }

    #[test]
    fn test_header_falls_back_to_document_id() {
        let mut c = chunk("a", "x");
        c.metadata = ChunkMetadata::default();
        assert_eq!(chunk_header(&c), "doc-a (text)");
    }
}
