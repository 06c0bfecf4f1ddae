//! Bounded ingestion queue feeding a fixed pool of workers

use super::{IngestJob, IngestPipeline, IngestReport};
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

struct QueuedJob {
    job: IngestJob,
    reply: oneshot::Sender<Result<IngestReport>>,
}

/// Handle to the outcome of a submitted job
pub struct IngestTicket {
    pub document_id: String,
    reply: oneshot::Receiver<Result<IngestReport>>,
}

impl IngestTicket {
    /// Wait for the job to finish
    pub async fn wait(self) -> Result<IngestReport> {
        self.reply.await.map_err(|_| {
            Error::State(format!(
                "ingest worker stopped before finishing document {}",
                self.document_id
            ))
        })?
    }
}

pub struct IngestQueue {
    sender: mpsc::Sender<QueuedJob>,
    workers: JoinSet<()>,
    capacity: usize,
}

impl IngestQueue {
    /// Start `workers` tasks pulling from a channel of `capacity` slots
    pub fn start(pipeline: Arc<IngestPipeline>, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut set = JoinSet::new();
        for worker_id in 0..workers.max(1) {
            let receiver = receiver.clone();
            let pipeline = pipeline.clone();
            set.spawn(async move {
                loop {
                    // Hold the lock only while waiting for the next job
                    let next = receiver.lock().await.recv().await;
                    let Some(QueuedJob { job, reply }) = next else {
                        break;
                    };
                    debug!(worker_id, document_id = %job.document_id, "Worker picked up document");
                    let outcome = pipeline.ingest(job).await;
                    if reply.send(outcome).is_err() {
                        debug!(worker_id, "Submitter dropped its ticket");
                    }
                }
                debug!(worker_id, "Ingest worker stopped");
            });
        }

        Self {
            sender,
            workers: set,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a job, waiting for a free slot
    pub async fn submit(&self, job: IngestJob) -> Result<IngestTicket> {
        let (queued, ticket) = Self::envelope(job);
        self.sender
            .send(queued)
            .await
            .map_err(|_| Error::State("ingest queue is closed".to_string()))?;
        Ok(ticket)
    }

    /// Queue a job only if a slot is free right now
    pub fn try_submit(&self, job: IngestJob) -> Result<IngestTicket> {
        let (queued, ticket) = Self::envelope(job);
        self.sender.try_send(queued).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull(self.capacity),
            mpsc::error::TrySendError::Closed(_) => {
                Error::State("ingest queue is closed".to_string())
            }
        })?;
        Ok(ticket)
    }

    fn envelope(job: IngestJob) -> (QueuedJob, IngestTicket) {
        let (reply, receiver) = oneshot::channel();
        let ticket = IngestTicket {
            document_id: job.document_id.clone(),
            reply: receiver,
        };
        (QueuedJob { job, reply }, ticket)
    }

    /// Stop accepting jobs and wait for queued ones to drain
    pub async fn shutdown(self) {
        let Self {
            sender,
            mut workers,
            ..
        } = self;
        drop(sender);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Ingest worker panicked: {}", e);
            }
        }
    }
}

/// Run jobs on a temporary queue and collect outcomes in submission order
pub async fn ingest_all(
    pipeline: Arc<IngestPipeline>,
    jobs: Vec<IngestJob>,
    workers: usize,
    capacity: usize,
    mut on_done: impl FnMut(&Result<IngestReport>),
) -> Vec<Result<IngestReport>> {
    let queue = IngestQueue::start(pipeline, workers, capacity);
    let (ticket_tx, mut ticket_rx) = mpsc::unbounded_channel();

    // Submit and collect concurrently so a full queue cannot stall collection
    let submitter = async {
        for job in jobs {
            let document_id = job.document_id.clone();
            let ticket = queue.submit(job).await;
            if ticket_tx.send((document_id, ticket)).is_err() {
                break;
            }
        }
        drop(ticket_tx);
    };
    let collector = async {
        let mut outcomes = Vec::new();
        while let Some((document_id, ticket)) = ticket_rx.recv().await {
            let outcome = match ticket {
                Ok(ticket) => ticket.wait().await,
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                warn!(document_id = %document_id, "Ingestion failed: {}", e);
            }
            on_done(&outcome);
            outcomes.push(outcome);
        }
        outcomes
    };

    let ((), outcomes) = tokio::join!(submitter, collector);
    queue.shutdown().await;
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::tests::FakeEmbedder;
    use crate::extract::{ExtractedContent, ExtractionSource, Extractor, LocalExtractor};
    use crate::ingest::tests::harness;
    use crate::meta::ProcessingStatus;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_sibling_failure_is_isolated() {
        let h = harness(Arc::new(LocalExtractor::new()), FakeEmbedder::new("fake", 8)).await;
        let good = h.tmp.path().join("good.txt");
        std::fs::write(&good, "transformer attention heads").unwrap();
        let missing = h.tmp.path().join("missing.txt");

        let pipeline = Arc::new(h.pipeline);
        let jobs = vec![
            IngestJob::new(&good, "papers"),
            IngestJob::new(&missing, "papers"),
            IngestJob::new(&good, "papers"),
        ];
        let mut seen = 0;
        let outcomes = ingest_all(pipeline, jobs, 2, 1, |_| seen += 1).await;

        assert_eq!(seen, 3);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].as_ref().unwrap().status, ProcessingStatus::Completed);
        assert!(matches!(outcomes[1], Err(Error::NotFound(_))));
        assert_eq!(outcomes[2].as_ref().unwrap().status, ProcessingStatus::Completed);
    }

    /// Blocks every extraction until released
    struct Gate(Arc<Notify>);

    #[async_trait]
    impl Extractor for Gate {
        fn provider(&self) -> &str {
            "gate"
        }

        async fn extract(&self, _source: &ExtractionSource) -> Result<ExtractedContent> {
            self.0.notified().await;
            Ok(ExtractedContent::default())
        }
    }

    #[tokio::test]
    async fn test_try_submit_rejects_when_full() {
        let gate = Arc::new(Notify::new());
        let h = harness(Arc::new(Gate(gate.clone())), FakeEmbedder::new("fake", 8)).await;
        let path = h.tmp.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();

        let queue = IngestQueue::start(Arc::new(h.pipeline), 1, 1);
        // The single worker takes the first job and blocks on the gate
        let first = queue.submit(IngestJob::new(&path, "c")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The second fills the only slot
        let second = queue.try_submit(IngestJob::new(&path, "c")).unwrap();
        let rejected = queue.try_submit(IngestJob::new(&path, "c"));
        assert!(matches!(rejected, Err(Error::QueueFull(1))));

        gate.notify_one();
        first.wait().await.unwrap();
        gate.notify_one();
        second.wait().await.unwrap();
        queue.shutdown().await;
    }
}
