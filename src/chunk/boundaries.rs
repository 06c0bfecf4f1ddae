//! Break point detection for chunking

/// Priority levels for break points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakPriority {
    /// Sentence boundary
    Sentence = 1,
    /// Paragraph boundary (highest)
    Paragraph = 2,
}

/// A potential break point in text
#[derive(Debug, Clone)]
pub struct BreakPoint {
    /// Byte position
    pub position: usize,
    /// Priority of this break point
    pub priority: BreakPriority,
}

impl BreakPoint {
    pub fn new(position: usize, priority: BreakPriority) -> Self {
        Self { position, priority }
    }
}

/// Byte ranges of fenced code blocks (positions to avoid breaking).
/// An unterminated fence runs to the end of the text.
pub fn find_code_blocks(text: &str) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut open: Option<usize> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            match open.take() {
                Some(start) => blocks.push((start, offset + line.len())),
                None => open = Some(offset),
            }
        }
        offset += line.len();
    }

    if let Some(start) = open {
        blocks.push((start, text.len()));
    }
    blocks
}

/// Check if a position is inside a code block
pub fn is_in_code_block(position: usize, code_blocks: &[(usize, usize)]) -> bool {
    code_blocks
        .iter()
        .any(|(start, end)| position > *start && position < *end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_priority_ordering() {
        assert!(BreakPriority::Paragraph > BreakPriority::Sentence);
    }

    #[test]
    fn test_find_code_blocks() {
        let text = "Some text\n```\ncode here\n```\nMore text";
        let blocks = find_code_blocks(text);

        assert_eq!(blocks, vec![(10, 28)]);
        assert_eq!(&text[blocks[0].0..blocks[0].1], "```\ncode here\n```\n");
    }

    #[test]
    fn test_unterminated_code_block() {
        let text = "intro\n```\nno closing fence";
        assert_eq!(find_code_blocks(text), vec![(6, text.len())]);
    }

    #[test]
    fn test_is_in_code_block() {
        let blocks = vec![(10, 30), (50, 70)];

        assert!(!is_in_code_block(5, &blocks));
        assert!(is_in_code_block(15, &blocks));
        assert!(!is_in_code_block(35, &blocks));
        assert!(is_in_code_block(60, &blocks));
        // Breaking right at a fence is fine
        assert!(!is_in_code_block(10, &blocks));
    }
}
