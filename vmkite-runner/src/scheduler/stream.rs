//! Job stream
//!
//! Turns repeated polls of the job source into a stream of new jobs.
//! A poll task pushes every batch to a dedup task, which forwards only the
//! jobs missing from the batch right before.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use vmkite_buildkite::{JobQuery, JobSource};
use vmkite_core::domain::job::Job;

/// Drops jobs that were present in the previous batch
///
/// Only the latest batch is remembered, so a job that vanishes from one
/// poll and comes back in a later one is reported again.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the jobs of `batch` that are new, replacing the remembered set
    pub fn filter(&mut self, batch: Vec<Job>) -> Vec<Job> {
        let previous = std::mem::take(&mut self.seen);
        let mut fresh = Vec::new();

        for job in batch {
            if self.seen.insert(job.id.clone()) && !previous.contains(&job.id) {
                fresh.push(job);
            }
        }

        fresh
    }
}

pub struct JobStream;

impl JobStream {
    /// Starts polling and returns the receiving end of the deduplicated stream
    ///
    /// Both tasks stop once the receiver is dropped.
    pub fn subscribe(
        source: Arc<dyn JobSource>,
        query: JobQuery,
        poll_interval: Duration,
    ) -> mpsc::UnboundedReceiver<Job> {
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        tokio::spawn(poll_loop(source, query, poll_interval, batch_tx));
        tokio::spawn(dedup_loop(batch_rx, job_tx));

        job_rx
    }
}

async fn poll_loop(
    source: Arc<dyn JobSource>,
    query: JobQuery,
    poll_interval: Duration,
    batches: mpsc::Sender<Vec<Job>>,
) {
    info!("Starting job poller (interval: {:?})", poll_interval);

    loop {
        debug!("Polling for pending jobs");

        match source.list_pending_jobs(&query).await {
            Ok(batch) => {
                debug!("Poll returned {} job(s)", batch.len());
                if batches.send(batch).await.is_err() {
                    debug!("Job stream closed, stopping poller");
                    return;
                }
            }
            Err(e) if e.is_not_found() => {
                error!("Job source does not know the configured organization or pipelines: {}", e);
            }
            Err(e) if e.is_transient() => {
                warn!("Job source unavailable, retrying in {:?}: {}", poll_interval, e);
            }
            Err(e) => {
                error!("Error listing pending jobs: {}", e);
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

async fn dedup_loop(mut batches: mpsc::Receiver<Vec<Job>>, jobs: mpsc::UnboundedSender<Job>) {
    let mut dedup = Deduplicator::new();

    while let Some(batch) = batches.recv().await {
        for job in dedup.filter(batch) {
            info!("New job {}", job);
            if jobs.send(job).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockJobSource, job};

    fn ids(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|job| job.id.as_str()).collect()
    }

    #[test]
    fn test_emits_once_per_consecutive_run() {
        let mut dedup = Deduplicator::new();
        let a = job("A", "t");
        let b = job("B", "t");

        assert_eq!(ids(&dedup.filter(vec![a.clone(), b.clone()])), ["A", "B"]);
        assert!(dedup.filter(vec![a.clone(), b.clone()]).is_empty());
        assert!(dedup.filter(vec![b.clone()]).is_empty());
        // A was missing from the previous batch
        assert_eq!(ids(&dedup.filter(vec![a.clone(), b.clone()])), ["A"]);
        assert!(dedup.filter(vec![]).is_empty());
        assert_eq!(ids(&dedup.filter(vec![b.clone()])), ["B"]);
    }

    #[test]
    fn test_duplicates_within_batch_emitted_once() {
        let mut dedup = Deduplicator::new();
        let a = job("A", "t");
        assert_eq!(ids(&dedup.filter(vec![a.clone(), a.clone()])), ["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_survives_source_errors() {
        let j1 = job("J1", "macos-14");
        let j2 = job("J2", "macos-14");
        let source = Arc::new(MockJobSource::with_batches(vec![
            Ok(vec![j1.clone()]),
            Err(()),
            Ok(vec![j1.clone()]),
            Ok(vec![j1.clone(), j2.clone()]),
        ]));

        let mut stream =
            JobStream::subscribe(source.clone(), JobQuery::default(), Duration::from_secs(5));

        assert_eq!(stream.recv().await.unwrap().id, "J1");
        assert_eq!(stream.recv().await.unwrap().id, "J2");
        assert!(source.polls() >= 4);
    }
}
