//! The projection trait.
//!
//! A projection is a value: a name (which is also its table), the set of
//! `(aggregate type, event types)` it subscribes to, setup DDL, and a
//! `reduce` turning one event into one [`Statement`]. Composition by data,
//! no inheritance, no registration side effects.

use async_trait::async_trait;

use garrison_core::aggregate::AggregateType;
use garrison_core::event::{EventType, StoredEvent};
use garrison_core::query::{AggregateFilter, Ordering, SearchQuery};
use garrison_core::{Position, Result};

use crate::statement::Statement;

/// Event subscription of one projection, per aggregate type.
#[derive(Debug, Clone)]
pub struct EventInterest {
    /// Aggregate type to subscribe to.
    pub aggregate_type: AggregateType,
    /// Event types within that aggregate; empty means all.
    pub event_types: Vec<EventType>,
}

impl EventInterest {
    /// Subscribe to specific event types of one aggregate.
    #[must_use]
    pub fn new(aggregate_type: AggregateType, event_types: Vec<EventType>) -> Self {
        Self {
            aggregate_type,
            event_types,
        }
    }
}

/// A read model maintained from the event stream.
///
/// # Contract
///
/// - `reduce` performs no storage writes; all side effects go through the
///   returned [`Statement`]. Reading from the event store during planning is
///   allowed (cascade deletes resolve indirect ids that way) and must be
///   idempotent.
/// - Handlers see events at least once and must be idempotent under replay
///   from any earlier checkpoint.
/// - Within one projection, events arrive in strict global-position order.
///   Across projections there is no ordering.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Unique name; also the materialised table's name.
    fn name(&self) -> &'static str;

    /// Setup DDL executed once at worker start (the projection's initial
    /// state). Empty when the table is managed by migrations.
    fn setup_ddl(&self) -> &'static str {
        ""
    }

    /// What the projection subscribes to.
    fn interests(&self) -> Vec<EventInterest>;

    /// Plan the side effect of one event.
    async fn reduce(&self, event: &StoredEvent) -> Result<Statement>;
}

/// The filter query a worker issues for `projection` past `checkpoint`.
#[must_use]
pub fn subscription_query(
    projection: &dyn Projection,
    checkpoint: Position,
    batch_size: u64,
) -> SearchQuery {
    let mut builder = SearchQuery::builder()
        .position_after(checkpoint)
        .ordering(Ordering::ByPosition)
        .limit(batch_size);
    for interest in projection.interests() {
        builder = builder.add_filter(
            AggregateFilter::aggregate_type(interest.aggregate_type)
                .event_types(interest.event_types),
        );
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::Statement;

    struct Dummy;

    #[async_trait]
    impl Projection for Dummy {
        fn name(&self) -> &'static str {
            "dummy"
        }

        fn interests(&self) -> Vec<EventInterest> {
            vec![EventInterest::new(
                AggregateType::User,
                vec![EventType::from_static("user.token.added")],
            )]
        }

        async fn reduce(&self, event: &StoredEvent) -> Result<Statement> {
            Ok(Statement::no_op(event))
        }
    }

    #[test]
    fn subscription_query_scopes_position_and_interests() {
        let query = subscription_query(&Dummy, Position::new(10, 2), 50);
        assert_eq!(query.position_after, Some(Position::new(10, 2)));
        assert_eq!(query.limit, Some(50));
        assert_eq!(query.ordering, Ordering::ByPosition);
        assert_eq!(query.filters.len(), 1);
        assert_eq!(
            query.filters[0].aggregate_type,
            Some(AggregateType::User)
        );
    }
}
