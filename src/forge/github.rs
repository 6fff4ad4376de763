//! GitHub gateway implementation
//!
//! REST client for the handful of GitHub endpoints the ingestion pipeline
//! needs: organization lookup, member listing, owned repositories and the two
//! lazily computed repository statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{ForgeError, ForgeGateway, MemberSummary, OrgProfile, RepoSummary, StatKind, StatsResponse};
use crate::config::AppConfig;

const USER_AGENT: &str = concat!("orgpulse/", env!("CARGO_PKG_VERSION"));

/// GitHub API client configuration
#[derive(Debug, Clone)]
pub struct GitHubApiConfig {
    pub base_url: String,
    pub accept_header: String,
}

/// GitHub gateway
#[derive(Debug, Clone)]
pub struct GitHubGateway {
    client: reqwest::Client,
    api_config: GitHubApiConfig,
    token: Option<String>,
}

impl GitHubGateway {
    /// Create a gateway against `base_url`; every request is bounded by `request_timeout`.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ForgeError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_config: GitHubApiConfig {
                base_url,
                accept_header: "application/vnd.github.v3+json".to_string(),
            },
            token,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ForgeError> {
        Self::new(
            config.forge_api_base.clone(),
            config.forge_token.clone(),
            config.pipeline.request_timeout(),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ForgeError> {
        let mut url = Url::parse(&self.api_config.base_url)?;
        url.path_segments_mut()
            .map_err(|_| {
                ForgeError::Config(format!(
                    "API base '{}' cannot carry a path",
                    self.api_config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, url: Url) -> Result<reqwest::Response, ForgeError> {
        let mut request = self
            .client
            .get(url.clone())
            .header("Accept", &self.api_config.accept_header);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ForgeError::Timeout {
                    url: url.to_string(),
                }
            } else {
                ForgeError::Network(err)
            }
        })?;

        if let Some(info) = self.extract_rate_limit_info(&response)
            && info.remaining == Some(0)
        {
            warn!(reset = ?info.reset, "GitHub rate limit exhausted");
        }

        Ok(response)
    }

    async fn read_body(&self, response: reqwest::Response, url: &Url) -> Result<String, ForgeError> {
        response.text().await.map_err(|err| {
            if err.is_timeout() {
                ForgeError::Timeout {
                    url: url.to_string(),
                }
            } else {
                ForgeError::Network(err)
            }
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, resource: &str) -> Result<T, ForgeError> {
        let response = self.send(url.clone()).await?;
        if !response.status().is_success() {
            return Err(self.error_for_status(response, resource).await);
        }
        let body = self.read_body(response, &url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_stats(
        &self,
        owner: &str,
        repo: &str,
        kind: StatKind,
    ) -> Result<StatsResponse, ForgeError> {
        let url = self.endpoint(&["repos", owner, repo, "stats", kind.as_str()])?;
        let response = self.send(url.clone()).await?;

        match response.status() {
            // GitHub answers 202 while the statistics are being computed.
            StatusCode::ACCEPTED => {
                debug!(owner, repo, stat = %kind, "statistics not ready yet");
                Ok(StatsResponse::Pending)
            }
            // Empty repositories have no statistics to compute.
            StatusCode::NO_CONTENT => Ok(StatsResponse::Ready(serde_json::Value::Array(
                Vec::new(),
            ))),
            status if status.is_success() => {
                let body = self.read_body(response, &url).await?;
                Ok(StatsResponse::Ready(serde_json::from_str(&body)?))
            }
            _ => {
                let resource = format!("{} statistics for {}/{}", kind, owner, repo);
                Err(self.error_for_status(response, &resource).await)
            }
        }
    }

    async fn error_for_status(&self, response: reqwest::Response, resource: &str) -> ForgeError {
        let status = response.status();
        let rate_limit = self.extract_rate_limit_info(&response);
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        if status == StatusCode::NOT_FOUND {
            return ForgeError::NotFound {
                resource: resource.to_string(),
            };
        }

        let exhausted = rate_limit
            .as_ref()
            .is_some_and(|info| info.remaining == Some(0));
        if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted)
        {
            let retry_after = retry_after.or_else(|| {
                rate_limit
                    .and_then(|info| info.reset)
                    .map(|reset| (reset - Utc::now()).num_seconds().max(0) as u64)
            });
            warn!(resource, ?retry_after, "Rate limited by GitHub API");
            return ForgeError::RateLimited { retry_after };
        }

        let body = response.text().await.unwrap_or_default();
        ForgeError::Api {
            status: status.as_u16(),
            message: format!("{}: {}", resource, body),
        }
    }

    /// Extract rate limit information from response headers
    fn extract_rate_limit_info(&self, response: &reqwest::Response) -> Option<RateLimitInfo> {
        let headers = response.headers();
        let remaining = headers
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let reset = headers
            .get("X-RateLimit-Reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0));

        if remaining.is_none() && reset.is_none() {
            return None;
        }
        Some(RateLimitInfo { remaining, reset })
    }
}

#[async_trait]
impl ForgeGateway for GitHubGateway {
    async fn get_organization(&self, name: &str) -> Result<OrgProfile, ForgeError> {
        let url = self.endpoint(&["orgs", name])?;
        self.get_json(url, &format!("organization {}", name)).await
    }

    async fn get_members(
        &self,
        org: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<MemberSummary>, ForgeError> {
        let mut url = self.endpoint(&["orgs", org, "members"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());
        self.get_json(url, &format!("members of {}", org)).await
    }

    async fn get_owned_repos(
        &self,
        username: &str,
        per_page: u32,
    ) -> Result<Vec<RepoSummary>, ForgeError> {
        let mut url = self.endpoint(&["users", username, "repos"])?;
        url.query_pairs_mut()
            .append_pair("type", "owner")
            .append_pair("sort", "updated")
            .append_pair("direction", "desc")
            .append_pair("per_page", &per_page.to_string());

        let response = self.send(url.clone()).await?;
        if !response.status().is_success() {
            return Err(self
                .error_for_status(response, &format!("repositories of {}", username))
                .await);
        }

        let body = self.read_body(response, &url).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let repos: Option<Vec<RepoSummary>> = serde_json::from_str(&body)?;
        Ok(repos.unwrap_or_default())
    }

    async fn get_code_frequency(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<StatsResponse, ForgeError> {
        self.get_stats(owner, repo, StatKind::CodeFrequency).await
    }

    async fn get_punch_card(&self, owner: &str, repo: &str) -> Result<StatsResponse, ForgeError> {
        self.get_stats(owner, repo, StatKind::PunchCard).await
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset: Option<DateTime<Utc>>,
}
