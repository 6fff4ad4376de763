//! Organization entity model
//!
//! This module contains the SeaORM entity model for the organizations table,
//! which stores one snapshot per forge organization keyed by login.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// Organization row. `members` holds the nested members/repositories document.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    /// Forge login (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub login: String,

    pub display_name: Option<String>,

    /// Public profile URL on the forge
    pub url: Option<String>,

    pub avatar_url: Option<String>,

    pub location: Option<String>,

    pub email: Option<String>,

    pub public_repos: i32,

    pub public_gists: i32,

    pub followers: i32,

    pub following: i32,

    /// Creation timestamp reported by the forge
    pub profile_created_at: Option<DateTimeWithTimeZone>,

    /// Last profile update reported by the forge
    pub profile_updated_at: Option<DateTimeWithTimeZone>,

    /// Serialized `Vec<Member>`
    #[sea_orm(column_type = "JsonBinary")]
    pub members: JsonValue,

    /// Join target computed by the repository stage of the latest run
    pub recently_updated_repo_count: Option<i32>,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last written
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
