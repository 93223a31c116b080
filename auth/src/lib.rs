//! Authentication read models and API access checks for the Garrison
//! identity platform.
//!
//! The projections here consume events from the `user`, `project`, `org`,
//! and `instance` aggregates and maintain the views API authentication
//! reads: the token table and the per-user-agent session table. Cascade
//! deletes pass through events only; projections keep the indirect indexes
//! that make them possible.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod projections;
pub mod token_view;

pub use access::{AccessContext, AccessPolicy, SessionAuthorizer};
pub use projections::{TokenProjection, UserSessionProjection};
pub use token_view::{TokenQueries, TokenRow};
