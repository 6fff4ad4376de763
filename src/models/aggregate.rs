//! In-memory Organization aggregate.
//!
//! The pipeline owns one [`Organization`] per run and hands it from stage to
//! stage; the repository layer maps it to and from the `organizations` row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::forge::types::{OrgProfile, RepoSummary};

use super::organization;

/// Root aggregate keyed by the forge login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub login: String,
    pub profile: Profile,
    pub members: Vec<Member>,
    pub recently_updated_repo_count: Option<usize>,
}

/// Public profile fields captured when the organization is first resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: Option<String>,
    pub url: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub public_repos: i32,
    pub public_gists: i32,
    pub followers: i32,
    pub following: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    #[serde(default)]
    pub repos: Vec<Repository>,
    /// Set when listing this member's repositories failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub stats: RepoStats,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Opaque statistic payloads exactly as returned by the forge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_frequency: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub punch_card: Option<JsonValue>,
    /// Reserved; no stage populates it yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_activity: Option<JsonValue>,
}

impl RepoStats {
    /// Both collected statistics are present.
    pub fn is_complete(&self) -> bool {
        self.code_frequency.is_some() && self.punch_card.is_some()
    }
}

impl Organization {
    /// Builds a fresh aggregate with no members from a forge profile.
    pub fn from_profile(profile: &OrgProfile) -> Self {
        Self {
            login: profile.login.clone(),
            profile: Profile {
                display_name: profile.name.clone(),
                url: profile.html_url.clone(),
                avatar_url: profile.avatar_url.clone(),
                location: profile.location.clone(),
                email: profile.email.clone(),
                public_repos: clamp_count(profile.public_repos),
                public_gists: clamp_count(profile.public_gists),
                followers: clamp_count(profile.followers),
                following: clamp_count(profile.following),
                created_at: profile.created_at,
                updated_at: profile.updated_at,
            },
            members: Vec::new(),
            recently_updated_repo_count: None,
        }
    }

    /// Total repositories currently attached to members.
    pub fn repository_count(&self) -> usize {
        self.members.iter().map(|member| member.repos.len()).sum()
    }

    /// Members whose repository listing failed.
    pub fn failure_count(&self) -> usize {
        self.members
            .iter()
            .filter(|member| member.error.is_some())
            .count()
    }

    pub fn find_member(&self, username: &str) -> Option<&Member> {
        self.members.iter().find(|member| member.username == username)
    }
}

impl Member {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            repos: Vec::new(),
            error: None,
        }
    }
}

impl From<&RepoSummary> for Repository {
    fn from(summary: &RepoSummary) -> Self {
        Self {
            name: summary.name.clone(),
            stats: RepoStats::default(),
            updated_at: summary.updated_at,
        }
    }
}

impl TryFrom<organization::Model> for Organization {
    type Error = serde_json::Error;

    fn try_from(model: organization::Model) -> Result<Self, Self::Error> {
        let members: Vec<Member> = serde_json::from_value(model.members)?;
        Ok(Self {
            login: model.login,
            profile: Profile {
                display_name: model.display_name,
                url: model.url,
                avatar_url: model.avatar_url,
                location: model.location,
                email: model.email,
                public_repos: model.public_repos,
                public_gists: model.public_gists,
                followers: model.followers,
                following: model.following,
                created_at: model.profile_created_at.map(|ts| ts.with_timezone(&Utc)),
                updated_at: model.profile_updated_at.map(|ts| ts.with_timezone(&Utc)),
            },
            members,
            recently_updated_repo_count: model
                .recently_updated_repo_count
                .and_then(|count| usize::try_from(count).ok()),
        })
    }
}

fn clamp_count(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
