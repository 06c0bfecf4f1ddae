//! Ingest command implementation

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::ingest::{collect_files, ingest_all, IngestJob, IngestReport};
use crate::meta::ProcessingStatus;
use crate::progress::{advance_progress, document_progress, finish_progress};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Ingest options
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// A file, or a directory whose files are ingested
    pub path: PathBuf,
    pub container_id: String,
    /// Reuse an existing document id (single file only)
    pub document_id: Option<String>,
    pub document_type: Option<String>,
    pub title: Option<String>,
    /// Suppress the progress bar
    pub quiet: bool,
}

/// Outcome of an ingest run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub documents: usize,
    pub completed: usize,
    pub failed: usize,
    pub chunks_created: usize,
    pub embeddings_written: usize,
    pub embeddings_missing: usize,
    pub duplicate_images: usize,
    pub reports: Vec<IngestReport>,
    /// Jobs that never reached a session (unreadable file, running session)
    pub errors: Vec<String>,
}

impl IngestSummary {
    fn record(&mut self, outcome: Result<IngestReport>) {
        self.documents += 1;
        match outcome {
            Ok(report) => {
                match report.status {
                    ProcessingStatus::Completed => self.completed += 1,
                    _ => self.failed += 1,
                }
                self.chunks_created += report.chunks_created;
                self.embeddings_written += report.embeddings_written;
                self.embeddings_missing += report.embeddings_missing;
                self.duplicate_images += report.duplicate_images;
                self.reports.push(report);
            }
            Err(e) => {
                self.failed += 1;
                self.errors.push(e.to_string());
            }
        }
    }
}

/// Build one job per file under `options.path`
pub fn plan_jobs(options: &IngestOptions) -> Result<Vec<IngestJob>> {
    let files = collect_files(&options.path)?;
    if options.document_id.is_some() && files.len() != 1 {
        return Err(Error::Config(
            "--document-id can only be used when ingesting a single file".to_string(),
        ));
    }

    Ok(files
        .into_iter()
        .map(|path| {
            let mut job = IngestJob::new(path, options.container_id.clone());
            if let Some(id) = &options.document_id {
                job.document_id = id.clone();
            }
            job.document_type = options.document_type.clone();
            job.title = options.title.clone();
            job
        })
        .collect())
}

/// Ingest every planned document on the worker queue
pub async fn cmd_ingest(ctx: &AppContext, options: IngestOptions) -> Result<IngestSummary> {
    let jobs = plan_jobs(&options)?;
    info!(
        path = %options.path.display(),
        container = %options.container_id,
        documents = jobs.len(),
        "Ingesting"
    );
    ctx.index.ensure_collections().await?;

    let progress = document_progress(jobs.len(), "Ingesting documents", options.quiet);
    let outcomes = ingest_all(
        ctx.pipeline.clone(),
        jobs,
        ctx.config.ingest.workers,
        ctx.config.ingest.queue_capacity,
        |_| advance_progress(&progress),
    )
    .await;
    finish_progress(progress, "Documents processed");

    let mut summary = IngestSummary::default();
    for outcome in outcomes {
        summary.record(outcome);
    }
    Ok(summary)
}

pub fn print_ingest_summary(summary: &IngestSummary) {
    println!("\n✓ Ingestion complete");
    println!("  Documents: {} ({} completed, {} failed)", summary.documents, summary.completed, summary.failed);
    println!("  Chunks created: {}", summary.chunks_created);
    println!("  Embeddings written: {}", summary.embeddings_written);
    if summary.embeddings_missing > 0 {
        println!("  ⚠ Embeddings missing: {}", summary.embeddings_missing);
    }
    if summary.duplicate_images > 0 {
        println!("  Near-duplicate images flagged: {}", summary.duplicate_images);
    }

    for report in summary.reports.iter().filter(|r| r.error.is_some()) {
        println!(
            "  ✗ {}: {}",
            report.document_id,
            report.error.as_deref().unwrap_or_default()
        );
    }
    for error in &summary.errors {
        println!("  ✗ {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plan_jobs_for_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "# A").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();

        let options = IngestOptions {
            path: tmp.path().to_path_buf(),
            container_id: "papers".to_string(),
            title: Some("Shared".to_string()),
            ..Default::default()
        };
        let jobs = plan_jobs(&options).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_ne!(jobs[0].document_id, jobs[1].document_id);
        assert!(jobs.iter().all(|j| j.container_id == "papers"));
        assert!(jobs.iter().all(|j| j.title.as_deref() == Some("Shared")));
    }

    #[test]
    fn test_document_id_requires_single_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("b.md"), "b").unwrap();

        let mut options = IngestOptions {
            path: tmp.path().to_path_buf(),
            container_id: "c".to_string(),
            document_id: Some("doc-1".to_string()),
            ..Default::default()
        };
        assert!(matches!(plan_jobs(&options), Err(Error::Config(_))));

        options.path = tmp.path().join("a.md");
        let jobs = plan_jobs(&options).unwrap();
        assert_eq!(jobs[0].document_id, "doc-1");
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = IngestSummary::default();
        summary.record(Err(Error::NotFound("gone.pdf".to_string())));
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
    }
}
