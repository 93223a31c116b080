//! Filter queries over the event log.
//!
//! A [`SearchQuery`] describes which events a caller wants and in which
//! order. Write models query by aggregate and event types ordered by
//! `(aggregate, sequence)`; projections query by position ordered by the
//! global position.

use chrono::{DateTime, Utc};

use crate::aggregate::AggregateType;
use crate::event::{EventType, Position};

/// Result ordering of a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ordering {
    /// `(instance, aggregate_type, aggregate_id, sequence)` ascending; the
    /// order write models reduce in.
    #[default]
    ByAggregate,
    /// Global `(position, in_tx_order)` ascending; the order projections
    /// replay in.
    ByPosition,
}

/// Filter scoped to one aggregate type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateFilter {
    /// Aggregate type to match.
    pub aggregate_type: Option<AggregateType>,
    /// Restrict to these aggregate ids; empty means all.
    pub aggregate_ids: Vec<String>,
    /// Restrict to these event types; empty means all.
    pub event_types: Vec<EventType>,
}

impl AggregateFilter {
    /// Filter on one aggregate type.
    #[must_use]
    pub fn aggregate_type(aggregate_type: AggregateType) -> Self {
        Self {
            aggregate_type: Some(aggregate_type),
            ..Self::default()
        }
    }

    /// Restrict to specific aggregate ids.
    #[must_use]
    pub fn aggregate_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregate_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to specific event types.
    #[must_use]
    pub fn event_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }
}

/// Query over the event log.
///
/// # Examples
///
/// ```
/// use garrison_core::aggregate::AggregateType;
/// use garrison_core::event::EventType;
/// use garrison_core::query::{AggregateFilter, SearchQuery};
///
/// let query = SearchQuery::builder()
///     .instance_id("inst-1")
///     .add_filter(
///         AggregateFilter::aggregate_type(AggregateType::Session)
///             .aggregate_ids(["sess-1"])
///             .event_types([EventType::from_static("session.added")]),
///     )
///     .build();
/// assert_eq!(query.filters.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Tenant scope; `None` spans instances (used by replay tooling only).
    pub instance_id: Option<String>,
    /// Restrict to aggregates owned by this organisation.
    pub resource_owner: Option<String>,
    /// Restrict to events caused by this principal.
    pub creator: Option<String>,
    /// Only events after this global position.
    pub position_after: Option<Position>,
    /// Only events created at or after this time.
    pub created_after: Option<DateTime<Utc>>,
    /// Only events created before this time.
    pub created_before: Option<DateTime<Utc>>,
    /// Only events with per-aggregate sequence at or above.
    pub sequence_from: Option<u64>,
    /// Only events with per-aggregate sequence at or below.
    pub sequence_to: Option<u64>,
    /// Per-aggregate-type filters, OR-ed together.
    pub filters: Vec<AggregateFilter>,
    /// Result ordering.
    pub ordering: Ordering,
    /// Maximum number of events returned.
    pub limit: Option<u64>,
}

impl SearchQuery {
    /// Start building a query.
    #[must_use]
    pub fn builder() -> SearchQueryBuilder {
        SearchQueryBuilder {
            query: Self::default(),
        }
    }

    /// Whether an event matches this query. Shared by the in-memory store
    /// and by tests; the SQL store compiles the same predicate to a WHERE
    /// clause.
    #[must_use]
    pub fn matches(&self, event: &crate::event::StoredEvent) -> bool {
        if let Some(instance_id) = &self.instance_id {
            if &event.aggregate.instance_id != instance_id {
                return false;
            }
        }
        if let Some(owner) = &self.resource_owner {
            if &event.aggregate.resource_owner != owner {
                return false;
            }
        }
        if let Some(creator) = &self.creator {
            if &event.creator != creator {
                return false;
            }
        }
        if let Some(after) = self.position_after {
            if event.position <= after {
                return false;
            }
        }
        if let Some(from) = self.created_after {
            if event.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_before {
            if event.created_at >= to {
                return false;
            }
        }
        if let Some(from) = self.sequence_from {
            if event.sequence < from {
                return false;
            }
        }
        if let Some(to) = self.sequence_to {
            if event.sequence > to {
                return false;
            }
        }
        if self.filters.is_empty() {
            return true;
        }
        self.filters.iter().any(|f| {
            if let Some(typ) = f.aggregate_type {
                if event.aggregate.aggregate_type != typ {
                    return false;
                }
            }
            if !f.aggregate_ids.is_empty() && !f.aggregate_ids.contains(&event.aggregate.id) {
                return false;
            }
            if !f.event_types.is_empty() && !f.event_types.contains(&event.event_type) {
                return false;
            }
            true
        })
    }
}

/// Builder for [`SearchQuery`].
#[derive(Debug, Clone, Default)]
pub struct SearchQueryBuilder {
    query: SearchQuery,
}

impl SearchQueryBuilder {
    /// Scope to one tenant.
    #[must_use]
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.query.instance_id = Some(instance_id.into());
        self
    }

    /// Scope to one organisation.
    #[must_use]
    pub fn resource_owner(mut self, resource_owner: impl Into<String>) -> Self {
        self.query.resource_owner = Some(resource_owner.into());
        self
    }

    /// Scope to one principal.
    #[must_use]
    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.query.creator = Some(creator.into());
        self
    }

    /// Only events strictly after a global position.
    #[must_use]
    pub const fn position_after(mut self, position: Position) -> Self {
        self.query.position_after = Some(position);
        self
    }

    /// Only events created at or after this time.
    #[must_use]
    pub const fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.query.created_after = Some(at);
        self
    }

    /// Only events created before this time.
    #[must_use]
    pub const fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.query.created_before = Some(at);
        self
    }

    /// Per-aggregate sequence lower bound (inclusive).
    #[must_use]
    pub const fn sequence_from(mut self, sequence: u64) -> Self {
        self.query.sequence_from = Some(sequence);
        self
    }

    /// Per-aggregate sequence upper bound (inclusive).
    #[must_use]
    pub const fn sequence_to(mut self, sequence: u64) -> Self {
        self.query.sequence_to = Some(sequence);
        self
    }

    /// Add an aggregate filter; filters are OR-ed.
    #[must_use]
    pub fn add_filter(mut self, filter: AggregateFilter) -> Self {
        self.query.filters.push(filter);
        self
    }

    /// Set the result ordering.
    #[must_use]
    pub const fn ordering(mut self, ordering: Ordering) -> Self {
        self.query.ordering = ordering;
        self
    }

    /// Cap the number of returned events.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Finish the query.
    #[must_use]
    pub fn build(self) -> SearchQuery {
        self.query
    }
}
