//! Organization resolution.

use tracing::{info, instrument};

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::models::Organization;

/// Looks the organization up on the forge and returns the stored aggregate,
/// creating it on first sight. An existing aggregate is returned unchanged.
#[instrument(skip(ctx))]
pub async fn resolve_organization(
    ctx: &StageContext<'_>,
    name: &str,
) -> Result<Organization, PipelineError> {
    let profile = ctx
        .gateway
        .get_organization(name)
        .await
        .map_err(|err| PipelineError::from_forge(Stage::Resolve, name, err))?;

    let existing = ctx
        .store
        .find_by_login(&profile.login)
        .await
        .map_err(|source| PipelineError::store(Stage::Resolve, &profile.login, source))?;

    if let Some(existing) = existing {
        info!(login = %existing.login, "organization already stored");
        return Ok(existing);
    }

    let org = Organization::from_profile(&profile);
    let stored = ctx.persist(Stage::Resolve, &org).await?;
    info!(login = %stored.login, "stored new organization");
    Ok(stored)
}
