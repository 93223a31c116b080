//! Instance aggregate events. Only the terminal event matters to this core;
//! instance setup is owned by other parts of the platform.

use garrison_core::event::{EventType, StoredEvent};
use garrison_core::registry::EventRegistry;
use garrison_core::{Error, Result};

use crate::registry::AnyEvent;

/// `instance.removed`; terminal.
pub const INSTANCE_REMOVED: EventType = EventType::from_static("instance.removed");

/// Decoded instance event.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceEvent {
    /// Instance removed; terminal.
    Removed,
}

impl InstanceEvent {
    /// Decode a stored instance event.
    ///
    /// # Errors
    ///
    /// Returns an error for non-instance tags.
    pub fn decode(event: &StoredEvent) -> Result<Self> {
        if event.event_type == INSTANCE_REMOVED {
            Ok(Self::Removed)
        } else {
            Err(Error::internal(
                "INSTANCE-event-unknown",
                format!("not an instance event: {}", event.event_type),
            ))
        }
    }

    pub(crate) fn register(registry: &mut EventRegistry<AnyEvent>) {
        registry.register(INSTANCE_REMOVED, |e| {
            Ok(AnyEvent::Instance(InstanceEvent::decode(e)?))
        });
    }
}
