//! vmkite Buildkite Client
//!
//! A small, typed HTTP client for the parts of the Buildkite REST API that
//! vmkite needs: listing scheduled/running jobs that ask for a VM, and
//! checking whether a job has finished.
//!
//! The runner only depends on the [`JobSource`] trait; [`BuildkiteClient`]
//! is its production implementation.
//!
//! # Example
//!
//! ```no_run
//! use vmkite_buildkite::{BuildkiteClient, JobQuery, JobSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BuildkiteClient::new("my-org", "api-token");
//!     let jobs = client.list_pending_jobs(&JobQuery::default()).await?;
//!     println!("{} job(s) waiting for a VM", jobs.len());
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod source;

pub use error::{ClientError, Result};
pub use source::{JobQuery, JobSource};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Default base URL of the Buildkite REST API
pub const DEFAULT_BASE_URL: &str = "https://api.buildkite.com";

/// HTTP client for the Buildkite REST API
#[derive(Debug, Clone)]
pub struct BuildkiteClient {
    /// Organization slug all requests are scoped to
    org: String,
    /// API access token sent as a bearer token
    api_token: String,
    /// Base URL of the API (e.g., "https://api.buildkite.com")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl BuildkiteClient {
    /// Create a new client for the public Buildkite API
    ///
    /// # Arguments
    /// * `org` - The organization slug
    /// * `api_token` - An API access token with `read_builds` scope
    pub fn new(org: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self::with_client(DEFAULT_BASE_URL, org, api_token, Client::new())
    }

    /// Create a client against a custom base URL and HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, or to
    /// point the client at a test server.
    pub fn with_client(
        base_url: impl Into<String>,
        org: impl Into<String>,
        api_token: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            org: org.into(),
            api_token: api_token.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::status(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}
