//! # Data Models
//!
//! SeaORM entities and the in-memory aggregate the pipeline threads through
//! its stages.

pub mod aggregate;
pub mod organization;

pub use aggregate::{Member, Organization, Profile, RepoStats, Repository};
pub use organization::Entity as OrganizationEntity;
