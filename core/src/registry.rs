//! Event-type decoder registry.
//!
//! The store holds payloads as opaque bytes. Domain modules register a
//! decoder per event type at startup; consumers look decoders up by the
//! event's type tag. Unregistered types are not an error: they decode to
//! the registry's `unknown` value so generic replay and newer-schema events
//! pass through older readers untouched.

use std::collections::HashMap;

use crate::error::Result;
use crate::event::{EventType, StoredEvent};

/// Decoder function: stored event in, typed domain value out.
pub type Decoder<D> = fn(&StoredEvent) -> Result<D>;

/// Registry mapping event-type tags to decoders.
///
/// Built once at process start and immutable afterwards; the domain crate
/// exposes the populated instance behind a `OnceLock`.
#[derive(Debug)]
pub struct EventRegistry<D> {
    decoders: HashMap<EventType, Decoder<D>>,
}

impl<D> Default for EventRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> EventRegistry<D> {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder for one event type.
    ///
    /// Later registrations of the same tag win; modules register disjoint
    /// tags so this never triggers in practice.
    pub fn register(&mut self, event_type: EventType, decoder: Decoder<D>) {
        self.decoders.insert(event_type, decoder);
    }

    /// Decode `event`, or `None` when its type has no registered decoder.
    ///
    /// # Errors
    ///
    /// Propagates the decoder's error for registered types with undecodable
    /// payloads.
    pub fn decode(&self, event: &StoredEvent) -> Option<Result<D>> {
        self.decoders.get(&event.event_type).map(|d| d(event))
    }

    /// Number of registered event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether no decoder is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
