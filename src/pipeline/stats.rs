//! Repository statistics collection.

use metrics::counter;
use rand::Rng;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::join::StageJoin;
use super::{Stage, StageContext};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::forge::{ForgeError, ForgeGateway, StatKind, StatsResponse};
use crate::models::Organization;

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// How long to keep asking for a statistic the forge is still computing.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub max_polls: u32,
    pub interval: Duration,
    pub max_interval: Duration,
}

impl From<&PipelineConfig> for PollPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_polls: config.stats_max_polls,
            interval: config.stats_poll_interval(),
            max_interval: MAX_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub enum StatFailure {
    Forge(ForgeError),
    StillPending { polls: u32 },
}

impl StatFailure {
    fn into_pipeline_error(self, owner: &str, repo: &str, kind: StatKind) -> PipelineError {
        let entity = format!("{}/{} ({})", owner, repo, kind);
        match self {
            StatFailure::Forge(err) => PipelineError::from_forge(Stage::CollectStats, entity, err),
            StatFailure::StillPending { polls } => PipelineError::PendingStats {
                stage: Stage::CollectStats,
                entity,
                polls,
            },
        }
    }
}

/// Re-issues a statistics request until the forge returns data.
///
/// The delay between polls doubles from `policy.interval` up to
/// `policy.max_interval`, with ±25% jitter.
pub async fn poll_until_ready(
    gateway: &dyn ForgeGateway,
    kind: StatKind,
    owner: &str,
    repo: &str,
    policy: &PollPolicy,
) -> Result<JsonValue, StatFailure> {
    let mut delay = policy.interval;

    for attempt in 1..=policy.max_polls {
        counter!("orgpulse_stat_polls_total", "stat" => kind.as_str()).increment(1);

        match gateway
            .get_stat(kind, owner, repo)
            .await
            .map_err(StatFailure::Forge)?
        {
            StatsResponse::Ready(value) => return Ok(value),
            StatsResponse::Pending if attempt < policy.max_polls => {
                let jitter_factor = rand::thread_rng().gen_range(0.75..1.25);
                let wait = delay.mul_f64(jitter_factor);
                debug!(owner, repo, stat = %kind, attempt, ?wait, "statistics pending, polling again");
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(policy.max_interval);
            }
            StatsResponse::Pending => {}
        }
    }

    Err(StatFailure::StillPending {
        polls: policy.max_polls,
    })
}

struct RepoStatsOutcome {
    member_index: usize,
    repo_index: usize,
    code_frequency: Result<JsonValue, StatFailure>,
    punch_card: Result<JsonValue, StatFailure>,
}

/// Fetches code frequency and punch card statistics for every recently
/// updated repository, two concurrent calls per repository.
///
/// The stage is done once `recently_updated_repo_count` repositories have
/// both calls resolved; only then is the aggregate persisted. The first
/// failed or still-pending statistic aborts the stage.
#[instrument(skip(ctx, org), fields(login = %org.login))]
pub async fn collect_statistics(
    ctx: &StageContext<'_>,
    mut org: Organization,
) -> Result<Organization, PipelineError> {
    let Some(target) = org.recently_updated_repo_count else {
        return Err(PipelineError::MissingJoinTarget {
            stage: Stage::CollectStats,
            entity: org.login.clone(),
        });
    };

    let policy = PollPolicy::from(ctx.config);
    let mut join = StageJoin::new(Stage::CollectStats, target, ctx.config.max_concurrency);

    for (member_index, member) in org.members.iter().enumerate() {
        for (repo_index, repo) in member.repos.iter().enumerate() {
            let gateway = ctx.gateway.clone();
            let owner = member.username.clone();
            let name = repo.name.clone();
            let policy = policy.clone();

            join.spawn(async move {
                let (code_frequency, punch_card) = tokio::join!(
                    poll_until_ready(&*gateway, StatKind::CodeFrequency, &owner, &name, &policy),
                    poll_until_ready(&*gateway, StatKind::PunchCard, &owner, &name, &policy),
                );
                RepoStatsOutcome {
                    member_index,
                    repo_index,
                    code_frequency,
                    punch_card,
                }
            });
        }
    }

    while !join.is_complete() {
        let outcome = join.next().await?;
        let member = &mut org.members[outcome.member_index];
        let owner = member.username.clone();
        let repo = &mut member.repos[outcome.repo_index];

        // Any statistics failure fails the run; dropping the join aborts the
        // branches still in flight.
        let code_frequency = outcome
            .code_frequency
            .map_err(|failure| failure.into_pipeline_error(&owner, &repo.name, StatKind::CodeFrequency))?;
        let punch_card = outcome
            .punch_card
            .map_err(|failure| failure.into_pipeline_error(&owner, &repo.name, StatKind::PunchCard))?;
        repo.stats.code_frequency = Some(code_frequency);
        repo.stats.punch_card = Some(punch_card);

        debug!(
            owner = %owner,
            repo = %repo.name,
            completed = join.completed(),
            target = join.target(),
            "repository statistics collected"
        );
    }

    info!(repositories = target, "statistics collected");
    ctx.persist(Stage::CollectStats, &org).await
}
