//! Org aggregate events.

use serde::{Deserialize, Serialize};

use garrison_core::event::{EventType, StoredEvent};
use garrison_core::registry::EventRegistry;
use garrison_core::{Error, Result};

use crate::registry::AnyEvent;

/// `org.added`
pub const ORG_ADDED: EventType = EventType::from_static("org.added");
/// `org.changed`
pub const ORG_CHANGED: EventType = EventType::from_static("org.changed");
/// `org.removed`; terminal.
pub const ORG_REMOVED: EventType = EventType::from_static("org.removed");

/// Unique-constraint namespace claimed by org names.
pub const UNIQUE_ORG_NAME: &str = "org_name";

/// Payload of [`ORG_ADDED`] and [`ORG_CHANGED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgNamed {
    /// Display name, unique per instance.
    pub name: String,
}

/// Decoded org event.
#[derive(Debug, Clone, PartialEq)]
pub enum OrgEvent {
    /// Org created.
    Added(OrgNamed),
    /// Org renamed.
    Changed(OrgNamed),
    /// Org removed; terminal.
    Removed,
}

impl OrgEvent {
    /// Decode a stored org event.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable payloads or non-org tags.
    pub fn decode(event: &StoredEvent) -> Result<Self> {
        match &event.event_type {
            t if *t == ORG_ADDED => Ok(Self::Added(event.unmarshal()?)),
            t if *t == ORG_CHANGED => Ok(Self::Changed(event.unmarshal()?)),
            t if *t == ORG_REMOVED => Ok(Self::Removed),
            other => Err(Error::internal(
                "ORG-event-unknown",
                format!("not an org event: {other}"),
            )),
        }
    }

    pub(crate) fn register(registry: &mut EventRegistry<AnyEvent>) {
        for tag in [ORG_ADDED, ORG_CHANGED, ORG_REMOVED] {
            registry.register(tag, |e| Ok(AnyEvent::Org(OrgEvent::decode(e)?)));
        }
    }
}
