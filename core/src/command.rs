//! Commands and unique-constraint operations.
//!
//! A command is the intent to append one event to one aggregate. Commands are
//! never persisted; the store turns each into a [`StoredEvent`] by assigning
//! sequences at commit time. Unique-constraint operations ride along with the
//! command and are applied in the same transaction.

use serde::Serialize;

use crate::aggregate::Aggregate;
use crate::error::{Error, Result};
use crate::event::EventType;

/// Direction of a unique-constraint change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintAction {
    /// Claim `(instance, unique_type, unique_field)`; fails the push with
    /// `AlreadyExists` when the row is live.
    Add,
    /// Release the row. Removing an absent row is a no-op.
    Remove,
}

/// One unique-constraint operation attached to a command.
///
/// The instance scope is taken from the owning command's aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    /// Constraint namespace, e.g. `"org_name"`.
    pub unique_type: &'static str,
    /// The value being claimed or released.
    pub unique_field: String,
    /// Add or remove.
    pub action: ConstraintAction,
    /// Stable error code reported when an add collides.
    pub violation_code: &'static str,
}

impl UniqueConstraint {
    /// Claim a value.
    #[must_use]
    pub fn add(
        unique_type: &'static str,
        unique_field: impl Into<String>,
        violation_code: &'static str,
    ) -> Self {
        Self {
            unique_type,
            unique_field: unique_field.into(),
            action: ConstraintAction::Add,
            violation_code,
        }
    }

    /// Release a value.
    #[must_use]
    pub fn remove(unique_type: &'static str, unique_field: impl Into<String>) -> Self {
        Self {
            unique_type,
            unique_field: unique_field.into(),
            action: ConstraintAction::Remove,
            violation_code: "STORE-unique-violation",
        }
    }
}

/// Intent to append one event.
///
/// # Examples
///
/// ```
/// use garrison_core::aggregate::{Aggregate, AggregateType};
/// use garrison_core::command::Command;
/// use garrison_core::event::EventType;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Added { name: String }
///
/// let agg = Aggregate::new("inst", AggregateType::Org, "org-1", "org-1");
/// let cmd = Command::new(agg, EventType::from_static("org.added"), "admin")
///     .with_payload(&Added { name: "acme".into() })
///     .unwrap();
/// assert!(cmd.payload.is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Target aggregate.
    pub aggregate: Aggregate,
    /// Event type the command produces.
    pub event_type: EventType,
    /// Payload schema revision, 1 unless bumped.
    pub revision: u16,
    /// Principal causing the event.
    pub creator: String,
    /// JSON payload bytes, if any.
    pub payload: Option<Vec<u8>>,
    /// Unique-constraint operations applied atomically with the event.
    pub constraints: Vec<UniqueConstraint>,
}

impl Command {
    /// Create a payload-less command at revision 1.
    #[must_use]
    pub fn new(aggregate: Aggregate, event_type: EventType, creator: impl Into<String>) -> Self {
        Self {
            aggregate,
            event_type,
            revision: 1,
            creator: creator.into(),
            payload: None,
            constraints: Vec::new(),
        }
    }

    /// Attach a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error when serialization fails, which only
    /// happens for payload types with non-string map keys or similar
    /// serde-incompatible shapes.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(payload).map_err(|e| {
            Error::internal(
                "COMMAND-payload-encode",
                format!("cannot encode payload of {}: {e}", self.event_type),
            )
        })?;
        self.payload = Some(bytes);
        Ok(self)
    }

    /// Attach a unique-constraint operation.
    #[must_use]
    pub fn with_constraint(mut self, constraint: UniqueConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Bump the payload schema revision.
    #[must_use]
    pub const fn with_revision(mut self, revision: u16) -> Self {
        self.revision = revision;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateType;

    fn aggregate() -> Aggregate {
        Aggregate::new("i1", AggregateType::Org, "o1", "o1")
    }

    #[test]
    fn builder_defaults() {
        let cmd = Command::new(aggregate(), EventType::from_static("org.added"), "admin");
        assert_eq!(cmd.revision, 1);
        assert!(cmd.payload.is_none());
        assert!(cmd.constraints.is_empty());
    }

    #[test]
    fn constraints_accumulate() {
        let cmd = Command::new(aggregate(), EventType::from_static("org.added"), "admin")
            .with_constraint(UniqueConstraint::add("org_name", "acme", "ORG-name-taken"))
            .with_constraint(UniqueConstraint::remove("org_name", "old"));
        assert_eq!(cmd.constraints.len(), 2);
        assert_eq!(cmd.constraints[0].action, ConstraintAction::Add);
        assert_eq!(cmd.constraints[1].action, ConstraintAction::Remove);
    }
}
