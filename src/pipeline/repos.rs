//! Repository enumeration.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use super::join::StageJoin;
use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::forge::{ForgeError, RepoSummary};
use crate::models::{Organization, Repository};

/// True when `updated_at` lies strictly inside `(now - window, now)`.
pub fn is_recently_updated(updated_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    updated_at > now - window && updated_at < now
}

/// Lists every member's own repositories concurrently and keeps the recently
/// updated ones. Sets `recently_updated_repo_count` to the number kept.
///
/// Each member counts as one completion whether its listing succeeded, came
/// back empty or failed; a failure is recorded on the member unless the run
/// is configured to fail fast.
#[instrument(skip(ctx, org), fields(login = %org.login, members = org.members.len()))]
pub async fn enumerate_repositories(
    ctx: &StageContext<'_>,
    mut org: Organization,
) -> Result<Organization, PipelineError> {
    let now = Utc::now();
    let window = ctx.config.recency_window();
    let per_page = ctx.config.repos_per_page;

    let mut join: StageJoin<(usize, Result<Vec<RepoSummary>, ForgeError>)> = StageJoin::new(
        Stage::EnumerateRepos,
        org.members.len(),
        ctx.config.max_concurrency,
    );

    for (index, member) in org.members.iter_mut().enumerate() {
        member.repos.clear();
        member.error = None;

        let gateway = ctx.gateway.clone();
        let username = member.username.clone();
        join.spawn(async move { (index, gateway.get_owned_repos(&username, per_page).await) });
    }

    let mut matched = 0usize;
    while !join.is_complete() {
        let (index, listing) = join.next().await?;
        let member = &mut org.members[index];

        match listing {
            Ok(repos) => {
                let before = member.repos.len();
                member.repos.extend(
                    repos
                        .iter()
                        .filter(|repo| {
                            repo.updated_at
                                .is_some_and(|ts| is_recently_updated(ts, now, window))
                        })
                        .map(Repository::from),
                );
                let kept = member.repos.len() - before;
                matched += kept;
                debug!(
                    username = %member.username,
                    listed = repos.len(),
                    kept,
                    completed = join.completed(),
                    "member repositories listed"
                );
            }
            Err(err) => {
                let err = PipelineError::from_forge(Stage::EnumerateRepos, &member.username, err);
                if ctx.config.fail_fast {
                    return Err(err);
                }
                counter!("orgpulse_failures_total", "stage" => Stage::EnumerateRepos.as_str(), "code" => err.error_code())
                    .increment(1);
                warn!(username = %member.username, error = %err, "recording failed repository listing");
                member.error = Some(err.to_string());
            }
        }
    }

    org.recently_updated_repo_count = Some(matched);
    counter!("orgpulse_recent_repos_total").increment(matched as u64);
    info!(recently_updated = matched, "repositories enumerated");

    ctx.persist(Stage::EnumerateRepos, &org).await
}
