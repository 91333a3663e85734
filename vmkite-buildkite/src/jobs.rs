//! Job-related API endpoints

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use vmkite_core::domain::job::{Job, JobMetadata};

use crate::BuildkiteClient;
use crate::error::Result;
use crate::source::JobQuery;

/// Build states whose jobs may still need a VM
const PENDING_STATES: [(&str, &str); 2] = [("state[]", "scheduled"), ("state[]", "running")];

const PAGE_SIZE: &str = "100";

impl BuildkiteClient {
    // =============================================================================
    // Job Listing
    // =============================================================================

    /// List scheduled and running jobs that carry eligible vmkite metadata
    ///
    /// With a pipeline filter every pipeline is listed in turn; otherwise the
    /// whole organization is listed in a single request.
    pub async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        if query.pipelines.is_empty() {
            debug!("Listing builds for organization {}", self.org);
            let url = format!("{}/v2/organizations/{}/builds", self.base_url, self.org);
            let builds = self.fetch_builds(&url).await?;
            return Ok(read_jobs_from_builds(builds));
        }

        let mut jobs = Vec::new();
        for pipeline in &query.pipelines {
            debug!("Listing builds for pipeline {}/{}", self.org, pipeline);
            let url = format!(
                "{}/v2/organizations/{}/pipelines/{}/builds",
                self.base_url, self.org, pipeline
            );
            let builds = self.fetch_builds(&url).await?;
            jobs.extend(read_jobs_from_builds(builds));
        }

        Ok(jobs)
    }

    /// Check whether a job is no longer scheduled or running
    ///
    /// A job missing from its build is reported as not finished.
    pub async fn is_finished(&self, job: &Job) -> Result<bool> {
        let url = format!(
            "{}/v2/organizations/{}/pipelines/{}/builds/{}",
            self.base_url, self.org, job.pipeline, job.build_number
        );
        debug!("Fetching build {} for job {}", url, job.id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let build: Build = self.handle_response(response).await?;

        let state = build
            .jobs
            .iter()
            .find(|candidate| candidate.id.as_deref() == Some(job.id.as_str()))
            .map(|candidate| candidate.state.as_deref().unwrap_or_default());

        Ok(match state {
            Some("scheduled") | Some("running") | None => false,
            Some(_) => true,
        })
    }

    async fn fetch_builds(&self, url: &str) -> Result<Vec<Build>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .query(&PENDING_STATES)
            .query(&[("per_page", PAGE_SIZE)])
            .send()
            .await?;

        self.handle_response(response).await
    }
}

/// Flattens builds into the jobs that can be scheduled onto a VM
fn read_jobs_from_builds(builds: Vec<Build>) -> Vec<Job> {
    let mut jobs = Vec::new();

    for build in builds {
        let Some(created_at) = build.created_at else {
            debug!("Skipping build {} without a creation time", build.number);
            continue;
        };
        let pipeline = build.pipeline.map(|p| p.slug).unwrap_or_default();

        for build_job in build.jobs {
            let Some(id) = build_job.id else {
                continue;
            };

            let metadata = JobMetadata::from_tags(&build_job.agent_query_rules);
            if !metadata.is_eligible() {
                continue;
            }

            jobs.push(Job {
                id,
                pipeline: pipeline.clone(),
                build_number: build.number.to_string(),
                created_at,
                metadata,
            });
        }
    }

    jobs
}

#[derive(Debug, Deserialize)]
struct Build {
    number: u64,
    created_at: Option<DateTime<Utc>>,
    pipeline: Option<PipelineRef>,
    #[serde(default)]
    jobs: Vec<BuildJob>,
}

#[derive(Debug, Deserialize)]
struct PipelineRef {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct BuildJob {
    id: Option<String>,
    state: Option<String>,
    #[serde(default)]
    agent_query_rules: Vec<String>,
}
