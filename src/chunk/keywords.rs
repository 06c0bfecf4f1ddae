//! Keyword normalization and token estimation.
//!
//! Normalization is shared by indexing (keywords stored per chunk), keyword
//! search (query side) and candidate screening, so all three agree on what
//! a keyword is.

use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/// Korean particles stripped from the end of a word
const JOSA_MULTI: &[&str] = &[
    "으로써", "에서는", "에게서", "으로", "에서", "에게", "까지", "부터", "보다", "처럼", "이나",
    "이랑", "하고", "과는", "와는", "에는", "로서", "로써",
];
const JOSA_SINGLE: &[char] = &[
    '은', '는', '이', '가', '을', '를', '의', '에', '와', '과', '도', '로', '만', '나', '랑',
];

const STOP_WORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "do", "does", "for",
    "from", "has", "have", "how", "if", "in", "into", "is", "it", "its", "of", "on", "or",
    "such", "than", "that", "the", "their", "then", "there", "these", "this", "those", "to",
    "was", "were", "what", "when", "where", "which", "who", "why", "will", "with",
    // Patent boilerplate
    "apparatus", "claim", "claims", "comprising", "comprises", "device", "embodiment",
    "embodiments", "invention", "method", "said", "system", "thereof", "wherein",
    // Korean
    "및", "등", "또는", "그리고", "하는", "있는", "것", "수", "위한", "대한", "통해", "의한",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

/// Hangul or CJK ideograph / kana
pub fn is_wide_script(c: char) -> bool {
    is_hangul(c)
        || matches!(c,
            '\u{4E00}'..='\u{9FFF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{3040}'..='\u{30FF}'
            | '\u{F900}'..='\u{FAFF}')
}

/// Remove one trailing particle. Single-syllable particles are only removed
/// after a non-Hangul character ("BERT와"), where they cannot be part of the
/// word itself.
fn strip_josa(word: &str) -> &str {
    for josa in JOSA_MULTI {
        if let Some(stem) = word.strip_suffix(josa) {
            if stem.chars().count() >= 2 {
                return stem;
            }
        }
    }

    let mut chars = word.char_indices().rev();
    if let (Some((idx, last)), Some((_, before))) = (chars.next(), chars.next()) {
        if JOSA_SINGLE.contains(&last) && !is_hangul(before) {
            return &word[..idx];
        }
    }
    word
}

/// Lowercase, drop punctuation, strip trailing particles. Returns `None` for
/// stop words and fragments too short to carry meaning.
pub fn normalize_keyword(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    let word = strip_josa(&cleaned);

    let char_count = word.chars().count();
    if char_count == 0 || (char_count < 2 && !word.chars().any(is_wide_script)) {
        return None;
    }
    if char_count == 1 && word.chars().all(|c| JOSA_SINGLE.contains(&c)) {
        return None;
    }
    if is_stop_word(word) {
        return None;
    }
    Some(word.to_string())
}

/// Normalized keywords of a text in first-occurrence order, duplicates kept
fn keyword_stream(text: &str) -> impl Iterator<Item = String> + '_ {
    text.unicode_words().filter_map(normalize_keyword)
}

/// Distinct normalized keywords of a query, in order of appearance
pub fn query_keywords(query: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for keyword in keyword_stream(query) {
        if !seen.contains(&keyword) {
            seen.push(keyword);
        }
    }
    seen
}

/// Most frequent keywords of a text (ties broken by first occurrence)
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, keyword) in keyword_stream(text).enumerate() {
        counts
            .entry(keyword)
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, position));
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(keyword, (count, first))| (keyword, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(max_keywords)
        .map(|(keyword, _, _)| keyword)
        .collect()
}

/// Approximate model tokens: about six ASCII characters per token, two
/// characters per token for other scripts. Additive over whitespace words.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| {
            let ascii = word.chars().filter(|c| c.is_ascii()).count();
            let other = word.chars().count() - ascii;
            ascii.div_ceil(6).max(usize::from(other == 0)) + other.div_ceil(2)
        })
        .sum()
}

/// Whitespace word count used for query-length decisions
pub fn query_length(query: &str) -> usize {
    query.split_whitespace().count()
}
