//! Prior-art candidate lists (patents, papers) screened from JSON files

use super::Candidate;
use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorArtCandidate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    /// `YYYY-MM-DD`, or just `YYYY`
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
}

impl PriorArtCandidate {
    /// Days since the common era, for ordering by publication date
    fn publication_day(&self) -> Option<i64> {
        let raw = self.publication_date.as_deref()?.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(date.num_days_from_ce() as i64);
        }
        raw.parse::<i32>()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
            .map(|date| date.num_days_from_ce() as i64)
    }
}

impl Candidate for PriorArtCandidate {
    fn stable_id(&self) -> &str {
        &self.id
    }

    fn primary_text(&self) -> &str {
        &self.title
    }

    fn secondary_text(&self) -> &str {
        &self.abstract_text
    }

    fn recency(&self) -> Option<i64> {
        self.publication_day()
    }

    fn base_score(&self) -> f32 {
        self.score.unwrap_or(0.0)
    }
}

/// Read a JSON array of candidates
pub async fn load_candidates(path: &Path) -> Result<Vec<PriorArtCandidate>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::NotFound(format!("candidate file '{}': {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::screen_and_rank;
    use tempfile::TempDir;

    #[test]
    fn test_recency_from_date_or_year() {
        let mut candidate = PriorArtCandidate {
            id: "US1".to_string(),
            title: "t".to_string(),
            abstract_text: String::new(),
            publication_date: Some("2021-06-01".to_string()),
            score: None,
        };
        let day = candidate.recency().unwrap();

        candidate.publication_date = Some("2021".to_string());
        assert!(candidate.recency().unwrap() < day);

        candidate.publication_date = Some("someday".to_string());
        assert_eq!(candidate.recency(), None);
    }

    #[tokio::test]
    async fn test_load_and_screen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("candidates.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "KR-1", "title": "이차전지 음극재", "abstract": "그래핀 기반 음극", "publication_date": "2020-01-01"},
                {"id": "US-2", "title": "Graphene anode", "abstract": "A graphene anode for batteries", "publication_date": "2022-03-04"},
                {"id": "US-2", "title": "Graphene anode", "abstract": "duplicate entry"},
                {"id": "US-3", "title": "Garden hose", "abstract": "Flexible hose"}
            ]"#,
        )
        .unwrap();

        let candidates = load_candidates(&path).await.unwrap();
        assert_eq!(candidates.len(), 4);

        let keywords = vec!["graphene".to_string(), "그래핀".to_string()];
        let (out, stats) = screen_and_rank(candidates, Some(&keywords), None, None);
        let ids: Vec<&str> = out.iter().map(|s| s.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["US-2", "KR-1"]);
        assert_eq!(stats.deduped, 1);
        assert_eq!(stats.low_relevance_dropped, 1);
    }
}
