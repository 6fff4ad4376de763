//! Member enumeration.

use metrics::counter;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::models::{Member, Organization};

/// Replaces the member list with a fresh listing from the forge.
///
/// Pages are fetched one after another so members keep page order. Paging
/// stops at the first empty or short page, or at `max_member_pages` when set.
#[instrument(skip(ctx, org), fields(login = %org.login))]
pub async fn enumerate_members(
    ctx: &StageContext<'_>,
    mut org: Organization,
) -> Result<Organization, PipelineError> {
    let per_page = ctx.config.members_per_page;
    let mut seen = HashSet::new();
    let mut page = 1u32;
    let mut pages_fetched = 0u32;

    // Repositories are rebuilt this run, so last run's join target no longer applies.
    org.members.clear();
    org.recently_updated_repo_count = None;

    loop {
        if let Some(max_pages) = ctx.config.max_member_pages
            && page > max_pages
        {
            warn!(
                max_pages,
                members = org.members.len(),
                "member page ceiling reached on a full page; listing may be truncated"
            );
            break;
        }

        debug!(page, per_page, "requesting members page");
        let batch = ctx
            .gateway
            .get_members(&org.login, page, per_page)
            .await
            .map_err(|err| {
                PipelineError::from_forge(
                    Stage::EnumerateMembers,
                    format!("{} members page {}", org.login, page),
                    err,
                )
            })?;

        pages_fetched += 1;
        let fetched = batch.len();
        for summary in batch {
            if seen.insert(summary.login.clone()) {
                org.members.push(Member::new(summary.login));
            } else {
                warn!(username = %summary.login, page, "skipping duplicate member");
            }
        }

        if fetched < per_page as usize {
            break;
        }
        page += 1;
    }

    counter!("orgpulse_members_total").increment(org.members.len() as u64);
    info!(members = org.members.len(), pages = pages_fetched, "members enumerated");

    ctx.persist(Stage::EnumerateMembers, &org).await
}
