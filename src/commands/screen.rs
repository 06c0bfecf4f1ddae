//! Screen command: rank a prior-art candidate list against keywords

use crate::error::Result;
use crate::screen::{load_candidates, screen_and_rank, PriorArtCandidate, Screened, ScreeningStats};
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ScreenOptions {
    pub keywords: Vec<String>,
    pub min_relevance: Option<f32>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenReport {
    pub results: Vec<Screened<PriorArtCandidate>>,
    pub stats: ScreeningStats,
}

pub async fn cmd_screen(path: &Path, options: ScreenOptions) -> Result<ScreenReport> {
    let candidates = load_candidates(path).await?;
    info!(path = %path.display(), candidates = candidates.len(), "Screening candidates");

    let keywords = (!options.keywords.is_empty()).then_some(options.keywords.as_slice());
    let (results, stats) =
        screen_and_rank(candidates, keywords, options.min_relevance, options.limit);
    Ok(ScreenReport { results, stats })
}

pub fn print_screen_report(report: &ScreenReport) {
    for (idx, screened) in report.results.iter().enumerate() {
        let candidate = &screened.candidate;
        println!(
            "{:>3}. {} {} (score {:.2})",
            idx + 1,
            candidate.id,
            candidate.title,
            screened.score
        );
        if !screened.matched_keywords.is_empty() {
            println!("     matched: {}", screened.matched_keywords.join(", "));
        }
    }

    let stats = &report.stats;
    println!(
        "\n{} in, {} invalid, {} duplicates, {} below relevance, {} out",
        stats.total_in, stats.invalid_dropped, stats.deduped, stats.low_relevance_dropped, stats.total_out
    );
}
