//! Remote API gateway
//!
//! Defines the interface the pipeline uses to talk to a code forge, plus the
//! GitHub REST implementation.

use async_trait::async_trait;
use thiserror::Error;

pub mod github;
pub mod types;

pub use github::GitHubGateway;
pub use types::{MemberSummary, OrgProfile, RepoSummary, StatKind, StatsResponse};

/// Gateway failures, before the pipeline attaches stage context.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by forge API (retry after {retry_after:?} seconds)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON deserialization error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Operations the ingestion pipeline consumes from a code forge.
#[async_trait]
pub trait ForgeGateway: Send + Sync {
    /// Looks up an organization profile; `NotFound` when the name does not resolve.
    async fn get_organization(&self, name: &str) -> Result<OrgProfile, ForgeError>;

    /// One page of organization members. Pages are 1-indexed.
    async fn get_members(
        &self,
        org: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<MemberSummary>, ForgeError>;

    /// Repositories owned by `username`, most recently updated first.
    async fn get_owned_repos(
        &self,
        username: &str,
        per_page: u32,
    ) -> Result<Vec<RepoSummary>, ForgeError>;

    async fn get_code_frequency(&self, owner: &str, repo: &str)
    -> Result<StatsResponse, ForgeError>;

    async fn get_punch_card(&self, owner: &str, repo: &str) -> Result<StatsResponse, ForgeError>;

    async fn get_stat(
        &self,
        kind: StatKind,
        owner: &str,
        repo: &str,
    ) -> Result<StatsResponse, ForgeError> {
        match kind {
            StatKind::CodeFrequency => self.get_code_frequency(owner, repo).await,
            StatKind::PunchCard => self.get_punch_card(owner, repo).await,
        }
    }
}
