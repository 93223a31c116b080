//! Process-wide decoder registry.
//!
//! Every domain module registers its event types here once; the populated
//! registry lives behind a `OnceLock` and is immutable afterwards. Unknown
//! event types decode to [`AnyEvent::Unknown`] so replay tooling and older
//! readers pass newer events through without panicking.

use std::sync::OnceLock;

use garrison_core::event::StoredEvent;
use garrison_core::registry::EventRegistry;
use garrison_core::Result;

use crate::idp_intent::IntentEvent;
use crate::instance::InstanceEvent;
use crate::org::OrgEvent;
use crate::project::ProjectEvent;
use crate::session::SessionEvent;
use crate::user::UserEvent;

/// Any decoded domain event.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyEvent {
    /// Session aggregate.
    Session(SessionEvent),
    /// User aggregate.
    User(UserEvent),
    /// Org aggregate.
    Org(OrgEvent),
    /// Project aggregate.
    Project(ProjectEvent),
    /// Instance aggregate.
    Instance(InstanceEvent),
    /// IdP intent aggregate.
    Intent(IntentEvent),
    /// Event type with no registered decoder; delivered raw.
    Unknown,
}

static REGISTRY: OnceLock<EventRegistry<AnyEvent>> = OnceLock::new();

/// The populated registry.
#[must_use]
pub fn registry() -> &'static EventRegistry<AnyEvent> {
    REGISTRY.get_or_init(|| {
        let mut registry = EventRegistry::new();
        SessionEvent::register(&mut registry);
        UserEvent::register(&mut registry);
        OrgEvent::register(&mut registry);
        ProjectEvent::register(&mut registry);
        InstanceEvent::register(&mut registry);
        IntentEvent::register(&mut registry);
        registry
    })
}

/// Decode a stored event through the registry.
///
/// # Errors
///
/// Propagates payload decoding failures for registered types. Unregistered
/// types yield [`AnyEvent::Unknown`], never an error.
pub fn decode(event: &StoredEvent) -> Result<AnyEvent> {
    registry().decode(event).unwrap_or(Ok(AnyEvent::Unknown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use garrison_core::aggregate::{Aggregate, AggregateType};
    use garrison_core::event::{EventType, Position};

    fn stored(event_type: EventType, payload: Option<Vec<u8>>) -> StoredEvent {
        StoredEvent {
            aggregate: Aggregate::new("i1", AggregateType::Session, "s1", "o1"),
            event_type,
            revision: 1,
            creator: "tester".to_owned(),
            payload,
            created_at: Utc::now(),
            sequence: 1,
            position: Position::new(1, 0),
        }
    }

    #[test]
    fn registry_decodes_session_events() {
        let event = stored(crate::session::SESSION_TERMINATED, None);
        assert_eq!(
            decode(&event).unwrap(),
            AnyEvent::Session(SessionEvent::Terminated)
        );
    }

    #[test]
    fn unknown_types_pass_through() {
        let event = stored(EventType::from_static("quota.notified"), None);
        assert_eq!(decode(&event).unwrap(), AnyEvent::Unknown);
    }

    #[test]
    fn registry_is_populated_once() {
        let a = registry() as *const _;
        let b = registry() as *const _;
        assert_eq!(a, b);
        assert!(!registry().is_empty());
    }
}
