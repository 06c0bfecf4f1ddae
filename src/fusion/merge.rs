//! Score fusion across strategies.
//!
//! Each strategy's scores live on their own scale (cosine similarity,
//! keyword overlap, weighted bm25), so they are min-max normalized per
//! strategy and blended with reciprocal-rank fusion. Both halves are divided
//! by the number of strategies that succeeded, keeping the fused score in
//! [0, 1].

use super::StrategyKind;
use crate::index::SearchChunk;
use crate::screen::Candidate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Results of one strategy that completed
#[derive(Debug, Clone)]
pub struct StrategyHits {
    pub kind: StrategyKind,
    pub hits: Vec<SearchChunk>,
}

/// A strategy hit carrying the fused score of its chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedCandidate {
    pub chunk: SearchChunk,
    pub strategy: StrategyKind,
    pub fused_score: f32,
}

impl Candidate for FusedCandidate {
    fn stable_id(&self) -> &str {
        &self.chunk.chunk_id
    }

    fn primary_text(&self) -> &str {
        &self.chunk.content
    }

    fn secondary_text(&self) -> &str {
        self.chunk.metadata.title.as_deref().unwrap_or("")
    }

    fn recency(&self) -> Option<i64> {
        None
    }

    fn base_score(&self) -> f32 {
        self.fused_score
    }
}

/// Scale scores to [0, 1]. A single distinct score maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let range = max - min;
    scores
        .iter()
        .map(|&s| if range > f32::EPSILON { (s - min) / range } else { 1.0 })
        .collect()
}

/// Fuse per-strategy results into a pool of candidates.
///
/// Every hit enters the pool, duplicates included, so screening sees which
/// strategies agreed. Hits keep strategy order, then rank order.
pub fn fuse(results: &[StrategyHits], rrf_k: f32) -> Vec<FusedCandidate> {
    let succeeded = results.len();
    if succeeded == 0 {
        return Vec::new();
    }

    let mut normalized_sum: HashMap<&str, f32> = HashMap::new();
    let mut rrf_sum: HashMap<&str, f32> = HashMap::new();

    for result in results {
        let scores: Vec<f32> = result.hits.iter().map(|h| h.score).collect();
        let normalized = min_max_normalize(&scores);
        // A chunk listed twice by one strategy counts once, at its best rank
        let mut seen = HashSet::new();
        for (rank, (hit, norm)) in result.hits.iter().zip(normalized).enumerate() {
            if !seen.insert(hit.chunk_id.as_str()) {
                continue;
            }
            *normalized_sum.entry(hit.chunk_id.as_str()).or_default() += norm;
            *rrf_sum.entry(hit.chunk_id.as_str()).or_default() += 1.0 / (rrf_k + rank as f32 + 1.0);
        }
    }

    let count = succeeded as f32;
    let rrf_max = count / (rrf_k + 1.0);
    let fused: HashMap<&str, f32> = normalized_sum
        .iter()
        .map(|(id, norm)| {
            let rrf = rrf_sum.get(id).copied().unwrap_or(0.0) / rrf_max;
            (*id, (0.5 * (norm / count) + 0.5 * rrf).clamp(0.0, 1.0))
        })
        .collect();

    results
        .iter()
        .flat_map(|result| {
            result.hits.iter().map(|hit| FusedCandidate {
                chunk: hit.clone(),
                strategy: result.kind,
                fused_score: fused.get(hit.chunk_id.as_str()).copied().unwrap_or(0.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkMetadata;
    use crate::meta::Modality;

    fn hit(id: &str, score: f32) -> SearchChunk {
        SearchChunk {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            content: format!("content of {}", id),
            score,
            modality: Modality::Text,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_normalize(&[0.7]), vec![1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_agreement_ranks_first() {
        let results = vec![
            StrategyHits {
                kind: StrategyKind::Vector,
                hits: vec![hit("a", 0.9), hit("b", 0.5)],
            },
            StrategyHits {
                kind: StrategyKind::Keyword,
                hits: vec![hit("b", 1.0), hit("c", 0.5)],
            },
        ];
        let pool = fuse(&results, 60.0);
        assert_eq!(pool.len(), 4);

        let score = |id: &str| pool.iter().find(|c| c.chunk.chunk_id == id).unwrap().fused_score;
        assert!(score("b") > score("a"));
        assert!(score("a") > score("c"));
        for candidate in &pool {
            assert!((0.0..=1.0).contains(&candidate.fused_score));
        }
        // Both entries for b carry the same fused score
        let b: Vec<f32> = pool
            .iter()
            .filter(|c| c.chunk.chunk_id == "b")
            .map(|c| c.fused_score)
            .collect();
        assert_eq!(b.len(), 2);
        assert_eq!(b[0], b[1]);
    }

    #[test]
    fn test_top_of_every_strategy_scores_one() {
        let results = vec![
            StrategyHits {
                kind: StrategyKind::Vector,
                hits: vec![hit("a", 0.8)],
            },
            StrategyHits {
                kind: StrategyKind::Fulltext,
                hits: vec![hit("a", 2.4)],
            },
        ];
        let pool = fuse(&results, 60.0);
        assert!((pool[0].fused_score - 1.0).abs() < 1e-6);
    }
}
