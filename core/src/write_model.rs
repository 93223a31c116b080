//! Write models: transient in-memory reductions used to validate commands.
//!
//! A write model declares which events it needs (a [`SearchQuery`]) and how
//! to fold them (`reduce`). The loader streams matching events through
//! `reduce` in aggregate order. Reduction must be deterministic: pure over
//! the event and the current state, no I/O, no clock reads.
//!
//! After a load the model reflects state through at least the moment the
//! query was issued. Newer events may exist; they surface as a `Conflict`
//! on the subsequent push and trigger the command engine's retry.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::event::StoredEvent;
use crate::event_store::EventStore;
use crate::query::SearchQuery;

/// State every write model tracks, embedded by composition.
#[derive(Debug, Clone, Default)]
pub struct WriteModel {
    /// Id of the aggregate being reduced.
    pub aggregate_id: String,
    /// Tenant scope.
    pub instance_id: String,
    /// Organisation owning the aggregate; filled from the first event when
    /// constructed empty.
    pub resource_owner: String,
    /// Sequence of the last reduced event, 0 before the first.
    pub processed_sequence: u64,
    /// Creation time of the last reduced event.
    pub change_date: Option<DateTime<Utc>>,
}

impl WriteModel {
    /// Model for one aggregate.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        aggregate_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            instance_id: instance_id.into(),
            resource_owner: resource_owner.into(),
            processed_sequence: 0,
            change_date: None,
        }
    }

    /// Fold the bookkeeping columns of one event.
    pub fn append(&mut self, event: &StoredEvent) {
        self.processed_sequence = event.sequence;
        self.change_date = Some(event.created_at);
        if self.resource_owner.is_empty() {
            self.resource_owner = event.aggregate.resource_owner.clone();
        }
    }
}

/// A reducible view over a slice of the event log.
pub trait QueryReducer: Send {
    /// The events this model needs.
    fn query(&self) -> SearchQuery;

    /// Fold one event into the model.
    ///
    /// # Errors
    ///
    /// Returns an error when the event payload cannot be decoded; the loader
    /// aborts on the first failure.
    fn reduce(&mut self, event: &StoredEvent) -> Result<()>;
}

/// Load a write model: filter, then reduce every event in order.
///
/// Verifies that sequences are strictly increasing per aggregate within the
/// load; the store writes gap-free sequences, so a regression here means a
/// broken backend, not a domain condition.
///
/// # Errors
///
/// Propagates filter and reduce errors, and returns `Internal` on a
/// sequence regression.
pub async fn load<M>(store: &dyn EventStore, model: &mut M) -> Result<()>
where
    M: QueryReducer + ?Sized,
{
    let events = store.filter(model.query()).await?;
    let mut last_seen: std::collections::HashMap<(String, String), u64> =
        std::collections::HashMap::new();

    for event in &events {
        let key = (
            event.aggregate.instance_id.clone(),
            format!("{}/{}", event.aggregate.aggregate_type, event.aggregate.id),
        );
        if let Some(prev) = last_seen.insert(key, event.sequence) {
            if event.sequence <= prev {
                return Err(Error::internal(
                    "WM-sequence-order",
                    format!(
                        "event sequence went from {prev} to {} on {}",
                        event.sequence, event.aggregate
                    ),
                ));
            }
        }
        model.reduce(event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Aggregate, AggregateType};
    use crate::event::{EventType, Position};

    #[test]
    fn append_tracks_sequence_and_owner() {
        let mut model = WriteModel::new("i1", "s1", "");
        let event = StoredEvent {
            aggregate: Aggregate::new("i1", AggregateType::Session, "s1", "org-1"),
            event_type: EventType::from_static("session.added"),
            revision: 1,
            creator: "tester".to_owned(),
            payload: None,
            created_at: Utc::now(),
            sequence: 3,
            position: Position::new(9, 0),
        };

        model.append(&event);
        assert_eq!(model.processed_sequence, 3);
        assert_eq!(model.resource_owner, "org-1");
        assert!(model.change_date.is_some());
    }

    #[test]
    fn append_keeps_existing_owner() {
        let mut model = WriteModel::new("i1", "s1", "org-0");
        let event = StoredEvent {
            aggregate: Aggregate::new("i1", AggregateType::Session, "s1", "org-1"),
            event_type: EventType::from_static("session.added"),
            revision: 1,
            creator: "tester".to_owned(),
            payload: None,
            created_at: Utc::now(),
            sequence: 1,
            position: Position::new(1, 0),
        };

        model.append(&event);
        assert_eq!(model.resource_owner, "org-0");
    }
}
