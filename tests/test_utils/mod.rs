//! Test utilities for pipeline testing.
//!
//! Sets up in-memory SQLite stores with migrations applied and a mock
//! GitHub API served by wiremock.

use anyhow::Result;
use chrono::{Duration, Utc};
use migration::{Migrator, MigratorTrait};
use orgpulse::config::PipelineConfig;
use orgpulse::db::StoreSession;
use orgpulse::forge::github::GitHubGateway;
use orgpulse::pipeline::Pipeline;
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Pipeline settings tuned for fast tests.
#[allow(dead_code)]
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        request_timeout_ms: 5_000,
        pipeline_deadline_seconds: 30,
        stats_max_polls: 5,
        stats_poll_interval_ms: 1,
        ..PipelineConfig::default()
    }
}

/// Builds a pipeline talking to `server` and backed by a fresh in-memory store.
#[allow(dead_code)]
pub async fn build_pipeline(server: &MockServer, config: PipelineConfig) -> Result<Pipeline> {
    build_pipeline_on(server, setup_test_db().await?, config)
}

/// Builds a pipeline over an existing store, so several runs can share it.
#[allow(dead_code)]
pub fn build_pipeline_on(
    server: &MockServer,
    db: DatabaseConnection,
    config: PipelineConfig,
) -> Result<Pipeline> {
    let gateway = GitHubGateway::new(server.uri(), None, config.request_timeout())?;
    let session = StoreSession::from_connection(db);
    Ok(Pipeline::new(Arc::new(gateway), session, config))
}

#[allow(dead_code)]
pub fn org_json(login: &str) -> Value {
    json!({
        "login": login,
        "name": format!("{} Inc", login),
        "html_url": format!("https://github.com/{}", login),
        "avatar_url": format!("https://avatars.example/{}.png", login),
        "location": "Earth",
        "public_repos": 12,
        "public_gists": 1,
        "followers": 30,
        "following": 0,
        "created_at": "2014-01-01T00:00:00Z",
        "updated_at": "2024-06-01T00:00:00Z"
    })
}

/// A repository listing entry last updated `days_ago` days before now.
#[allow(dead_code)]
pub fn repo_json(owner: &str, name: &str, days_ago: i64) -> Value {
    let updated_at = Utc::now() - Duration::days(days_ago);
    json!({
        "name": name,
        "full_name": format!("{}/{}", owner, name),
        "fork": false,
        "updated_at": updated_at.to_rfc3339()
    })
}

#[allow(dead_code)]
pub fn member_logins(prefix: &str, range: std::ops::Range<usize>) -> Value {
    Value::Array(
        range
            .map(|i| json!({ "login": format!("{}{:03}", prefix, i) }))
            .collect(),
    )
}

#[allow(dead_code)]
pub async fn mount_org(server: &MockServer, login: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/orgs/{}", login)))
        .respond_with(ResponseTemplate::new(200).set_body_json(org_json(login)))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub async fn mount_members_page(server: &MockServer, login: &str, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/orgs/{}/members", login)))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub async fn mount_repos(server: &MockServer, username: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/users/{}/repos", username)))
        .and(query_param("type", "owner"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

/// Both statistics endpoints for one repository, each expected exactly once.
#[allow(dead_code)]
pub async fn mount_ready_stats(server: &MockServer, owner: &str, repo: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/stats/code_frequency", owner, repo)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[1717200000, 120, -40]])))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/stats/punch_card", owner, repo)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[0, 9, 3]])))
        .expect(1)
        .mount(server)
        .await;
}
