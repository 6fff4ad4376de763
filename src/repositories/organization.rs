//! Organization repository for database operations
//!
//! This module provides the OrganizationRepository struct which stores and
//! loads the Organization aggregate by its forge login.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Set};
use std::sync::Arc;

use crate::error::StoreError;
use crate::models::Organization;
use crate::models::organization::{self, Entity as OrganizationEntity};

/// Repository for organization aggregates
#[derive(Debug, Clone)]
pub struct OrganizationRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl OrganizationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds an organization by its forge login
    pub async fn find_by_login(&self, login: &str) -> Result<Option<Organization>, StoreError> {
        let model = OrganizationEntity::find_by_id(login.to_string())
            .one(&*self.db)
            .await?;
        model
            .map(Organization::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Number of stored organizations
    pub async fn count(&self) -> Result<u64, StoreError> {
        Ok(OrganizationEntity::find().count(&*self.db).await?)
    }

    /// Inserts the aggregate or replaces the stored row with the same login.
    ///
    /// Returns the aggregate as read back from the store.
    pub async fn upsert(&self, org: &Organization) -> Result<Organization, StoreError> {
        let members = serde_json::to_value(&org.members)?;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let existing = OrganizationEntity::find_by_id(org.login.clone())
            .one(&*self.db)
            .await?;

        let stored = if let Some(existing) = existing {
            let mut am: organization::ActiveModel = existing.into();
            apply(&mut am, org, members);
            am.updated_at = Set(now);
            am.update(&*self.db).await?
        } else {
            let mut am = organization::ActiveModel {
                login: Set(org.login.clone()),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };
            apply(&mut am, org, members);

            OrganizationEntity::insert(am).exec(&*self.db).await?;

            OrganizationEntity::find_by_id(org.login.clone())
                .one(&*self.db)
                .await?
                .ok_or_else(|| StoreError::NotPersisted {
                    login: org.login.clone(),
                })?
        };

        Ok(Organization::try_from(stored)?)
    }
}

fn apply(am: &mut organization::ActiveModel, org: &Organization, members: serde_json::Value) {
    let profile = &org.profile;
    am.display_name = Set(profile.display_name.clone());
    am.url = Set(profile.url.clone());
    am.avatar_url = Set(profile.avatar_url.clone());
    am.location = Set(profile.location.clone());
    am.email = Set(profile.email.clone());
    am.public_repos = Set(profile.public_repos);
    am.public_gists = Set(profile.public_gists);
    am.followers = Set(profile.followers);
    am.following = Set(profile.following);
    am.profile_created_at = Set(profile.created_at.map(Into::into));
    am.profile_updated_at = Set(profile.updated_at.map(Into::into));
    am.members = Set(members);
    am.recently_updated_repo_count = Set(org
        .recently_updated_repo_count
        .map(|count| i32::try_from(count).unwrap_or(i32::MAX)));
}
