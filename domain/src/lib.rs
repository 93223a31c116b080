//! Domain events and value validation for the Garrison identity platform.
//!
//! Each aggregate module declares its event-type tags, typed payloads, and a
//! decoder; [`registry::registry`] exposes the populated process-wide
//! decoder table. Cross-aggregate effects never pass through object
//! references, only through events; projections maintain the indirect
//! indexes used for cascade deletes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod idp_intent;
pub mod instance;
pub mod org;
pub mod project;
pub mod registry;
pub mod session;
pub mod user;
pub mod validation;

pub use registry::{decode, registry, AnyEvent};
