//! Query intent and the strategies each intent invokes

use super::StrategyKind;
use crate::chunk::{normalize_keyword, query_length};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use unicode_segmentation::UnicodeSegmentation;

/// What the caller is trying to find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// A single fact; semantic match is enough
    Factual,
    /// Two or more things set against each other
    Comparison,
    /// Exact terms, identifiers or quoted phrases
    Keyword,
    /// Open-ended; cast the widest net
    Exploratory,
}

const COMPARISON_MARKERS: &[&str] = &[
    "vs", "versus", "compare", "compared", "comparison", "difference", "differences", "differ",
    "contrast", "비교", "차이", "차이점", "대비", "대조",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "who", "when", "where", "which", "define", "definition", "무엇", "누가", "언제",
    "어디", "어느", "정의",
];

impl QueryIntent {
    pub fn name(&self) -> &'static str {
        match self {
            QueryIntent::Factual => "factual",
            QueryIntent::Comparison => "comparison",
            QueryIntent::Keyword => "keyword",
            QueryIntent::Exploratory => "exploratory",
        }
    }

    /// Strategies invoked for this intent
    pub fn strategies(&self) -> &'static [StrategyKind] {
        match self {
            QueryIntent::Factual => &[StrategyKind::Vector],
            QueryIntent::Comparison => &[StrategyKind::Vector, StrategyKind::Keyword],
            QueryIntent::Keyword => &[StrategyKind::Keyword, StrategyKind::Fulltext],
            QueryIntent::Exploratory => {
                &[StrategyKind::Vector, StrategyKind::Keyword, StrategyKind::Fulltext]
            }
        }
    }

    /// Heuristic classification from the query text alone
    pub fn classify(query: &str) -> Self {
        let lowered = query.to_lowercase();
        let words: Vec<&str> = lowered.unicode_words().collect();

        let is_marker = |word: &str| {
            COMPARISON_MARKERS
                .iter()
                .any(|marker| word == *marker || (marker.chars().count() > 1 && is_hangul_prefix(word, marker)))
        };
        if words.iter().any(|w| is_marker(w)) {
            return QueryIntent::Comparison;
        }

        if query.contains('"') || words.iter().any(|w| looks_like_identifier(w)) {
            return QueryIntent::Keyword;
        }

        let asks = lowered.trim_end().ends_with('?')
            || words
                .first()
                .map(|w| QUESTION_WORDS.contains(w))
                .unwrap_or(false);
        if asks && query_length(query) <= 8 {
            return QueryIntent::Factual;
        }

        // Terse term lists ("graphene anode coating") with nothing filtered
        // out as a stop word read as keyword queries
        let kept = words.iter().filter(|w| normalize_keyword(w).is_some()).count();
        if !asks && words.len() >= 2 && words.len() <= 4 && kept == words.len() {
            return QueryIntent::Keyword;
        }

        QueryIntent::Exploratory
    }
}

/// Korean markers also match with a particle attached ("차이는")
fn is_hangul_prefix(word: &str, marker: &str) -> bool {
    marker.chars().all(crate::chunk::is_wide_script) && word.starts_with(marker)
}

/// Patent numbers, model names and similar: letters mixed with digits
fn looks_like_identifier(word: &str) -> bool {
    let has_digit = word.chars().any(|c| c.is_ascii_digit());
    let has_alpha = word.chars().any(|c| c.is_alphabetic());
    has_digit && has_alpha && word.chars().count() >= 4
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryIntent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "factual" => Ok(QueryIntent::Factual),
            "comparison" => Ok(QueryIntent::Comparison),
            "keyword" => Ok(QueryIntent::Keyword),
            "exploratory" => Ok(QueryIntent::Exploratory),
            _ => Err(Error::Config(format!("Unknown query intent: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(QueryIntent::classify("BERT와 GPT 차이점"), QueryIntent::Comparison);
        assert_eq!(QueryIntent::classify("BERT vs GPT"), QueryIntent::Comparison);
        assert_eq!(QueryIntent::classify("What is a transformer?"), QueryIntent::Factual);
        assert_eq!(QueryIntent::classify("claims of US10123456B2"), QueryIntent::Keyword);
        assert_eq!(QueryIntent::classify("\"graphene anode\""), QueryIntent::Keyword);
        assert_eq!(QueryIntent::classify("graphene anode coating"), QueryIntent::Keyword);
        assert_eq!(
            QueryIntent::classify("tell me about recent work on battery materials and their tradeoffs"),
            QueryIntent::Exploratory
        );
    }

    #[test]
    fn test_strategy_subsets() {
        assert_eq!(QueryIntent::Factual.strategies(), &[StrategyKind::Vector]);
        assert_eq!(
            QueryIntent::Comparison.strategies(),
            &[StrategyKind::Vector, StrategyKind::Keyword]
        );
        assert_eq!(QueryIntent::Exploratory.strategies().len(), 3);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Keyword".parse::<QueryIntent>().unwrap(), QueryIntent::Keyword);
        assert!("vague".parse::<QueryIntent>().is_err());
    }
}
