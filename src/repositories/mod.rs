//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! organizations table.

pub mod organization;

pub use organization::OrganizationRepository;
