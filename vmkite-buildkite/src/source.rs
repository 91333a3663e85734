//! Job source abstraction
//!
//! The runner polls a [`JobSource`] for pending jobs. Keeping it behind a
//! trait lets the orchestration loop be exercised without a live provider.

use async_trait::async_trait;
use vmkite_core::domain::job::Job;

use crate::BuildkiteClient;
use crate::error::Result;

/// Filter applied when listing pending jobs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    /// Pipeline slugs to restrict to; empty means every pipeline of the org
    pub pipelines: Vec<String>,
}

/// External source of CI jobs that need a VM
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Lists every scheduled or running job with eligible placement metadata
    async fn list_pending_jobs(&self, query: &JobQuery) -> Result<Vec<Job>>;

    /// Whether the provider considers the job finished
    async fn is_job_finished(&self, job: &Job) -> Result<bool>;
}

#[async_trait]
impl JobSource for BuildkiteClient {
    async fn list_pending_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        self.list_jobs(query).await
    }

    async fn is_job_finished(&self, job: &Job) -> Result<bool> {
        self.is_finished(job).await
    }
}
