//! Candidate screening and ranking
//!
//! A single primitive shared by retrieval fusion and prior-art lists:
//! validity filter, dedup by stable id, keyword relevance, cutoff, a
//! deterministic sort and truncation.

mod prior_art;

pub use prior_art::*;

use crate::chunk::{is_wide_script, normalize_keyword};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

/// Anything that can be screened
pub trait Candidate {
    /// Identity used for dedup and as the final tie-breaker
    fn stable_id(&self) -> &str;

    fn primary_text(&self) -> &str;

    fn secondary_text(&self) -> &str;

    /// Larger is newer; `None` sorts after any known recency
    fn recency(&self) -> Option<i64>;

    /// Score carried in from upstream (e.g. fused retrieval score)
    fn base_score(&self) -> f32 {
        0.0
    }
}

/// A candidate that survived screening
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Screened<T> {
    pub candidate: T,
    pub relevance: f32,
    /// `relevance + base_score`
    pub score: f32,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScreeningStats {
    pub total_in: usize,
    pub invalid_dropped: usize,
    pub deduped: usize,
    pub low_relevance_dropped: usize,
    pub total_out: usize,
}

/// Relevance cutoffs used when the caller gives none
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningDefaults {
    /// Keyword count from which `many_keywords_min` applies
    pub many_keywords: usize,
    pub many_keywords_min: f32,
    pub some_keywords_min: f32,
    pub no_keywords_min: f32,
}

impl Default for ScreeningDefaults {
    fn default() -> Self {
        Self {
            many_keywords: 8,
            many_keywords_min: 2.0,
            some_keywords_min: 1.0,
            no_keywords_min: 0.0,
        }
    }
}

impl ScreeningDefaults {
    pub fn min_relevance(&self, keyword_count: usize) -> f32 {
        if keyword_count >= self.many_keywords {
            self.many_keywords_min
        } else if keyword_count >= 1 {
            self.some_keywords_min
        } else {
            self.no_keywords_min
        }
    }
}

/// Weight of a matched keyword by length. Hangul and CJK characters count
/// double.
pub fn keyword_weight(keyword: &str) -> f32 {
    let length: usize = keyword
        .chars()
        .map(|c| if is_wide_script(c) { 2 } else { 1 })
        .sum();
    match length {
        0..=2 => 0.5,
        3..=5 => 1.0,
        _ => 1.5,
    }
}

/// Normalize and dedup target keywords, keeping order
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for keyword in keywords.iter().filter_map(|k| normalize_keyword(k)) {
        if !normalized.contains(&keyword) {
            normalized.push(keyword);
        }
    }
    normalized
}

/// Relevance of a text against normalized keywords, and the keywords that
/// matched. Whole normalized tokens match; wide-script keywords also match
/// inside compounds.
pub fn relevance(text: &str, keywords: &[String]) -> (f32, Vec<String>) {
    if keywords.is_empty() {
        return (0.0, Vec::new());
    }

    let tokens: HashSet<String> = text.unicode_words().filter_map(normalize_keyword).collect();
    let lowered = text.to_lowercase();

    let matched: Vec<String> = keywords
        .iter()
        .filter(|k| {
            tokens.contains(k.as_str()) || (k.chars().any(is_wide_script) && lowered.contains(k.as_str()))
        })
        .cloned()
        .collect();
    let score = matched.iter().map(|k| keyword_weight(k)).sum();
    (score, matched)
}

fn is_valid<T: Candidate>(candidate: &T) -> bool {
    !candidate.stable_id().trim().is_empty()
        && !(candidate.primary_text().trim().is_empty()
            && candidate.secondary_text().trim().is_empty())
}

/// Screen with the default cutoffs
pub fn screen_and_rank<T: Candidate>(
    candidates: Vec<T>,
    target_keywords: Option<&[String]>,
    min_relevance_score: Option<f32>,
    max_candidates: Option<usize>,
) -> (Vec<Screened<T>>, ScreeningStats) {
    screen_and_rank_with(
        &ScreeningDefaults::default(),
        candidates,
        target_keywords,
        min_relevance_score,
        max_candidates,
    )
}

pub fn screen_and_rank_with<T: Candidate>(
    defaults: &ScreeningDefaults,
    candidates: Vec<T>,
    target_keywords: Option<&[String]>,
    min_relevance_score: Option<f32>,
    max_candidates: Option<usize>,
) -> (Vec<Screened<T>>, ScreeningStats) {
    let mut stats = ScreeningStats {
        total_in: candidates.len(),
        ..ScreeningStats::default()
    };

    // Dedup keeps the first-seen slot; a later, strictly better duplicate
    // replaces the representative in place.
    let mut slots: Vec<T> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        if !is_valid(&candidate) {
            stats.invalid_dropped += 1;
            continue;
        }
        match position.get(candidate.stable_id()) {
            Some(&idx) => {
                stats.deduped += 1;
                if candidate.base_score() > slots[idx].base_score() {
                    slots[idx] = candidate;
                }
            }
            None => {
                position.insert(candidate.stable_id().to_string(), slots.len());
                slots.push(candidate);
            }
        }
    }

    let keywords = target_keywords.map(normalize_keywords).unwrap_or_default();
    let min_relevance = min_relevance_score.unwrap_or_else(|| defaults.min_relevance(keywords.len()));

    let mut screened: Vec<Screened<T>> = Vec::with_capacity(slots.len());
    for candidate in slots {
        let text = format!("{}\n{}", candidate.primary_text(), candidate.secondary_text());
        let (matched_relevance, matched_keywords) = relevance(&text, &keywords);
        if matched_relevance < min_relevance {
            stats.low_relevance_dropped += 1;
            continue;
        }
        let score = matched_relevance + candidate.base_score();
        screened.push(Screened {
            candidate,
            relevance: matched_relevance,
            score,
            matched_keywords,
        });
    }

    screened.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.candidate.recency().cmp(&a.candidate.recency()))
            .then_with(|| a.candidate.stable_id().cmp(b.candidate.stable_id()))
    });
    if let Some(max) = max_candidates {
        screened.truncate(max);
    }

    stats.total_out = screened.len();
    (screened, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        title: String,
        body: String,
        year: Option<i64>,
        score: f32,
    }

    fn item(id: &str, title: &str, body: &str, year: Option<i64>, score: f32) -> Item {
        Item {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            year,
            score,
        }
    }

    impl Candidate for Item {
        fn stable_id(&self) -> &str {
            &self.id
        }
        fn primary_text(&self) -> &str {
            &self.title
        }
        fn secondary_text(&self) -> &str {
            &self.body
        }
        fn recency(&self) -> Option<i64> {
            self.year
        }
        fn base_score(&self) -> f32 {
            self.score
        }
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_keyword_weight() {
        assert_eq!(keyword_weight("ai"), 0.5);
        assert_eq!(keyword_weight("bert"), 1.0);
        assert_eq!(keyword_weight("transformer"), 1.5);
        // Two Hangul syllables count as four
        assert_eq!(keyword_weight("차이"), 1.0);
        assert_eq!(keyword_weight("차이점"), 1.5);
    }

    #[test]
    fn test_min_relevance_defaults() {
        let defaults = ScreeningDefaults::default();
        assert_eq!(defaults.min_relevance(0), 0.0);
        assert_eq!(defaults.min_relevance(3), 1.0);
        assert_eq!(defaults.min_relevance(8), 2.0);
    }

    #[test]
    fn test_invalid_and_duplicates() {
        let candidates = vec![
            item("", "orphan", "", None, 0.0),
            item("blank", "  ", "\n", None, 0.0),
            item("a", "Battery anode", "", None, 0.1),
            item("a", "Battery anode", "", None, 0.9),
            item("a", "Battery anode", "", None, 0.9),
        ];

        let (out, stats) = screen_and_rank(candidates, None, None, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].candidate.score, 0.9);
        assert_eq!(
            stats,
            ScreeningStats {
                total_in: 5,
                invalid_dropped: 2,
                deduped: 2,
                low_relevance_dropped: 0,
                total_out: 1,
            }
        );
    }

    #[test]
    fn test_relevance_cutoff_and_sort() {
        let candidates = vec![
            item("p1", "Graphene anode for lithium battery", "", Some(2019), 0.0),
            item("p2", "Solar panel mounting", "", Some(2021), 0.0),
            item("p3", "Lithium battery cooling", "", Some(2022), 0.0),
            item("p4", "Lithium battery housing", "", Some(2020), 0.0),
        ];
        let targets = keywords(&["lithium", "battery", "graphene"]);

        let (out, stats) = screen_and_rank(candidates, Some(&targets), None, None);
        let ids: Vec<&str> = out.iter().map(|s| s.candidate.id.as_str()).collect();
        // p1 matches three keywords; p3 and p4 tie and the newer one wins
        assert_eq!(ids, vec!["p1", "p3", "p4"]);
        assert_eq!(stats.low_relevance_dropped, 1);
        assert_eq!(out[0].matched_keywords, targets);
    }

    #[test]
    fn test_korean_particles_match() {
        let candidates = vec![item("k1", "BERT와 GPT의 차이점 정리", "", None, 0.0)];
        let targets = keywords(&["BERT", "GPT", "차이점"]);
        let (out, _) = screen_and_rank(candidates, Some(&targets), None, None);
        assert_eq!(out.len(), 1);
        // bert and gpt weigh 1.0, 차이점 counts as six characters
        assert_eq!(out[0].relevance, 1.0 + 1.0 + 1.5);
    }

    #[test]
    fn test_idempotent() {
        let candidates = vec![
            item("x", "neural ranking", "dense retrieval", Some(3), 0.4),
            item("y", "neural search", "", Some(5), 0.4),
            item("x", "neural ranking", "dense retrieval", Some(3), 0.2),
            item("z", "cooking", "", None, 0.9),
        ];
        let targets = keywords(&["neural"]);

        let (first, _) = screen_and_rank(candidates, Some(&targets), None, Some(5));
        let again: Vec<Item> = first.iter().map(|s| s.candidate.clone()).collect();
        let (second, stats) = screen_and_rank(again, Some(&targets), None, Some(5));

        assert_eq!(first, second);
        assert_eq!(stats.deduped, 0);
    }

    #[test]
    fn test_truncation() {
        let candidates: Vec<Item> = (0..10)
            .map(|i| item(&format!("c{}", i), "text", "", Some(i), 0.0))
            .collect();
        let (out, stats) = screen_and_rank(candidates, None, None, Some(3));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].candidate.id, "c9");
        assert_eq!(stats.total_out, 3);
    }
}
