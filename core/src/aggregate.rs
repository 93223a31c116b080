//! Aggregate identity types.
//!
//! An aggregate is the unit of consistency: it owns a strictly ordered,
//! gap-free event sequence. Identity is the tuple
//! `(instance_id, aggregate_type, id)`; `instance_id` is the multi-tenant
//! partition and `resource_owner` records the organisation the aggregate
//! belongs to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The closed set of aggregate types known to the platform.
///
/// Adding a variant is a schema change; the database stores the lowercase
/// string form returned by [`AggregateType::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    /// The tenant itself.
    Instance,
    /// An organisation inside an instance.
    Org,
    /// A project owning applications.
    Project,
    /// A human or machine user.
    User,
    /// An authentication session.
    Session,
    /// An identity-provider intent (external login handshake).
    IdpIntent,
    /// A signing key pair.
    KeyPair,
}

impl AggregateType {
    /// Database string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Org => "org",
            Self::Project => "project",
            Self::User => "user",
            Self::Session => "session",
            Self::IdpIntent => "idpintent",
            Self::KeyPair => "key_pair",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance" => Ok(Self::Instance),
            "org" => Ok(Self::Org),
            "project" => Ok(Self::Project),
            "user" => Ok(Self::User),
            "session" => Ok(Self::Session),
            "idpintent" => Ok(Self::IdpIntent),
            "key_pair" => Ok(Self::KeyPair),
            _ => Err(Error::internal(
                "AGG-type-unknown",
                format!("unknown aggregate type {s:?}"),
            )),
        }
    }
}

/// Full identity of one aggregate instance.
///
/// # Examples
///
/// ```
/// use garrison_core::aggregate::{Aggregate, AggregateType};
///
/// let agg = Aggregate::new("inst-1", AggregateType::Session, "sess-42", "org-7");
/// assert_eq!(agg.aggregate_type, AggregateType::Session);
/// assert_eq!(agg.resource_owner, "org-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    /// Multi-tenant partition.
    pub instance_id: String,
    /// Aggregate type from the closed set.
    pub aggregate_type: AggregateType,
    /// Identifier, opaque within `(instance_id, aggregate_type)`.
    pub id: String,
    /// Organisation owning the aggregate.
    pub resource_owner: String,
}

impl Aggregate {
    /// Create an aggregate identity.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        aggregate_type: AggregateType,
        id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            aggregate_type,
            id: id.into(),
            resource_owner: resource_owner.into(),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.instance_id, self.aggregate_type, self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_type_roundtrip() {
        for typ in [
            AggregateType::Instance,
            AggregateType::Org,
            AggregateType::Project,
            AggregateType::User,
            AggregateType::Session,
            AggregateType::IdpIntent,
            AggregateType::KeyPair,
        ] {
            assert_eq!(typ.as_str().parse::<AggregateType>().unwrap(), typ);
        }
    }

    #[test]
    fn unknown_aggregate_type_is_rejected() {
        assert!("widget".parse::<AggregateType>().is_err());
    }

    #[test]
    fn display_joins_identity() {
        let agg = Aggregate::new("i1", AggregateType::User, "u1", "o1");
        assert_eq!(format!("{agg}"), "i1/user/u1");
    }
}
