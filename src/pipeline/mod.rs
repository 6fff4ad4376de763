//! Ingestion pipeline
//!
//! Runs the stages `Resolve → EnumerateMembers → EnumerateRepos →
//! CollectStats → Done` strictly in order. Each stage receives the
//! Organization aggregate, mutates and persists it, and returns it to the
//! orchestrator, which hands it to the next stage.

use metrics::{counter, histogram};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, instrument};

use crate::config::PipelineConfig;
use crate::db::StoreSession;
use crate::error::PipelineError;
use crate::forge::ForgeGateway;
use crate::models::Organization;
use crate::repositories::OrganizationRepository;
use crate::telemetry::{self, RunContext};

pub mod join;
pub mod members;
pub mod repos;
pub mod resolve;
pub mod stats;

pub use members::enumerate_members;
pub use repos::{enumerate_repositories, is_recently_updated};
pub use resolve::resolve_organization;
pub use stats::collect_statistics;

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    EnumerateMembers,
    EnumerateRepos,
    CollectStats,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::EnumerateMembers => "enumerate_members",
            Stage::EnumerateRepos => "enumerate_repos",
            Stage::CollectStats => "collect_stats",
            Stage::Done => "done",
        }
    }

    /// The only transition out of each state. `Done` is terminal.
    pub fn next(&self) -> Stage {
        match self {
            Stage::Resolve => Stage::EnumerateMembers,
            Stage::EnumerateMembers => Stage::EnumerateRepos,
            Stage::EnumerateRepos => Stage::CollectStats,
            Stage::CollectStats | Stage::Done => Stage::Done,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a stage needs besides the aggregate itself.
#[derive(Clone)]
pub struct StageContext<'a> {
    pub gateway: Arc<dyn ForgeGateway>,
    pub store: &'a OrganizationRepository,
    pub config: &'a PipelineConfig,
}

impl StageContext<'_> {
    /// Writes the aggregate and returns the stored copy.
    pub(crate) async fn persist(
        &self,
        stage: Stage,
        org: &Organization,
    ) -> Result<Organization, PipelineError> {
        self.store
            .upsert(org)
            .await
            .map_err(|source| PipelineError::store(stage, &org.login, source))
    }
}

/// One run-to-completion ingestion for a single organization.
pub struct Pipeline {
    gateway: Arc<dyn ForgeGateway>,
    session: StoreSession,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(gateway: Arc<dyn ForgeGateway>, session: StoreSession, config: PipelineConfig) -> Self {
        Self {
            gateway,
            session,
            config,
        }
    }

    pub fn store(&self) -> &OrganizationRepository {
        self.session.organizations()
    }

    /// Runs every stage and then releases the store session, whatever the outcome.
    pub async fn run(self, org_name: &str) -> Result<Organization, PipelineError> {
        let result = telemetry::with_run_context(RunContext::generate(), self.execute(org_name)).await;

        let login = result
            .as_ref()
            .map(|org| org.login.clone())
            .unwrap_or_else(|_| org_name.to_string());
        let closed = self.session.close().await;

        match (result, closed) {
            (Ok(org), Ok(())) => {
                info!(login = %org.login, "store session closed");
                Ok(org)
            }
            (Ok(_), Err(source)) => Err(PipelineError::store(Stage::Done, login, source)),
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    error!(error = %close_err, "failed to close store session after failed run");
                }
                Err(err)
            }
        }
    }

    /// Runs `Resolve` through `CollectStats` without releasing the store session.
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn execute(&self, org_name: &str) -> Result<Organization, PipelineError> {
        if let Some(run_id) = telemetry::current_run_id() {
            tracing::Span::current().record("run_id", run_id.as_str());
        }

        let deadline = Instant::now() + self.config.pipeline_deadline();
        let ctx = StageContext {
            gateway: self.gateway.clone(),
            store: self.session.organizations(),
            config: &self.config,
        };

        let org = self
            .advance(Stage::Resolve, deadline, org_name, resolve_organization(&ctx, org_name))
            .await?;
        let login = org.login.clone();
        let org = self
            .advance(Stage::EnumerateMembers, deadline, &login, enumerate_members(&ctx, org))
            .await?;
        let org = self
            .advance(Stage::EnumerateRepos, deadline, &login, enumerate_repositories(&ctx, org))
            .await?;
        let org = self
            .advance(Stage::CollectStats, deadline, &login, collect_statistics(&ctx, org))
            .await?;

        info!(
            login = %org.login,
            members = org.members.len(),
            repositories = org.repository_count(),
            failures = org.failure_count(),
            "pipeline reached {}",
            Stage::Done
        );
        Ok(org)
    }

    async fn advance<F>(
        &self,
        stage: Stage,
        deadline: Instant,
        entity: &str,
        work: F,
    ) -> Result<Organization, PipelineError>
    where
        F: Future<Output = Result<Organization, PipelineError>>,
    {
        info!(stage = %stage, entity, "stage started");
        let started = Instant::now();

        let outcome = match tokio::time::timeout_at(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PipelineError::Timeout {
                stage,
                entity: entity.to_string(),
                detail: format!(
                    "pipeline deadline of {}s exceeded",
                    self.config.pipeline_deadline_seconds
                ),
            }),
        };

        histogram!("orgpulse_stage_duration_ms", "stage" => stage.as_str())
            .record(started.elapsed().as_millis() as f64);

        match outcome {
            Ok(org) => {
                info!(stage = %stage, next = %stage.next(), entity, "stage complete");
                Ok(org)
            }
            Err(err) => {
                counter!("orgpulse_failures_total", "stage" => stage.as_str(), "code" => err.error_code())
                    .increment(1);
                error!(stage = %stage, entity, code = err.error_code(), error = %err, "stage failed");
                Err(err)
            }
        }
    }
}
