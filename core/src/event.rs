//! Stored events and stream positions.
//!
//! An event is an immutable fact: once pushed it is never modified or
//! deleted. Payloads are kept as the exact JSON bytes that were written, so
//! fields unknown to this build survive read-modify cycles untouched and
//! older readers never break on additive schema changes.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::{Error, Result};

/// Event type tag, e.g. `"session.added"`.
///
/// Domain modules declare their tags as `const` statics; tags read back from
/// the database are owned strings. Tags are versioned by convention through
/// new names (`user.token.added` vs a hypothetical `user.token.added.v2`)
/// together with the numeric payload [`revision`](StoredEvent::revision).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// Declare a compile-time event type tag.
    #[must_use]
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// The tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

impl From<&EventType> for EventType {
    fn from(t: &EventType) -> Self {
        t.clone()
    }
}

/// Global position of an event in the log.
///
/// `position` is the globally monotonic sequence assigned at commit;
/// `in_tx_order` disambiguates events written by the same push. The derived
/// lexicographic ordering is the replay order projections observe.
///
/// # Examples
///
/// ```
/// use garrison_core::event::Position;
///
/// let a = Position::new(10, 0);
/// let b = Position::new(10, 1);
/// let c = Position::new(11, 0);
/// assert!(a < b && b < c);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    /// Globally monotonic sequence.
    pub position: u64,
    /// Order within the writing transaction.
    pub in_tx_order: u32,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(position: u64, in_tx_order: u32) -> Self {
        Self {
            position,
            in_tx_order,
        }
    }

    /// The position before any event, used as the initial checkpoint.
    #[must_use]
    pub const fn beginning() -> Self {
        Self::new(0, 0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.position, self.in_tx_order)
    }
}

/// One persisted event, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Aggregate the event belongs to.
    pub aggregate: Aggregate,
    /// Event type tag.
    pub event_type: EventType,
    /// Payload schema revision.
    pub revision: u16,
    /// Principal that caused the event.
    pub creator: String,
    /// Opaque JSON payload bytes; `None` for payload-less events.
    pub payload: Option<Vec<u8>>,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
    /// Per-aggregate sequence, gap-free starting at 1.
    pub sequence: u64,
    /// Global position.
    pub position: Position,
}

impl StoredEvent {
    /// Decode the payload into a typed value.
    ///
    /// A missing payload decodes as the empty JSON object, so payload types
    /// with `#[serde(default)]` fields (or no fields) always succeed.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error when the stored bytes do not decode into
    /// `T`; stored payloads are producer-validated, so this indicates data
    /// corruption or a missed revision bump.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes: &[u8] = self.payload.as_deref().unwrap_or(b"{}");
        serde_json::from_slice(bytes).map_err(|e| {
            Error::internal(
                "EVENT-payload-decode",
                format!("cannot decode payload of {}: {e}", self.event_type),
            )
        })
    }

    /// The raw payload bytes, empty when the event has none.
    #[must_use]
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateType;

    fn event_with_payload(payload: Option<Vec<u8>>) -> StoredEvent {
        StoredEvent {
            aggregate: Aggregate::new("i1", AggregateType::Session, "s1", "o1"),
            event_type: EventType::from_static("session.added"),
            revision: 1,
            creator: "tester".to_owned(),
            payload,
            created_at: Utc::now(),
            sequence: 1,
            position: Position::new(1, 0),
        }
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    struct Payload {
        #[serde(default)]
        user_id: String,
    }

    #[test]
    fn unmarshal_decodes_json() {
        let event = event_with_payload(Some(br#"{"user_id":"u1"}"#.to_vec()));
        let payload: Payload = event.unmarshal().unwrap();
        assert_eq!(payload.user_id, "u1");
    }

    #[test]
    fn unmarshal_missing_payload_uses_defaults() {
        let event = event_with_payload(None);
        let payload: Payload = event.unmarshal().unwrap();
        assert_eq!(payload, Payload::default());
    }

    #[test]
    fn unmarshal_preserves_unknown_fields_by_never_rewriting() {
        let raw = br#"{"user_id":"u1","added_in_v9":true}"#.to_vec();
        let event = event_with_payload(Some(raw.clone()));
        let _typed: Payload = event.unmarshal().unwrap();
        // The stored bytes are untouched by decoding.
        assert_eq!(event.payload_bytes(), raw.as_slice());
    }

    #[test]
    fn positions_order_by_global_then_tx() {
        let mut positions = vec![
            Position::new(2, 0),
            Position::new(1, 1),
            Position::new(1, 0),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                Position::new(1, 0),
                Position::new(1, 1),
                Position::new(2, 0),
            ]
        );
    }
}
