//! The event store abstraction.
//!
//! # Design
//!
//! The trait is deliberately minimal: atomically push commands, filter
//! events, read the newest per-aggregate sequences, and enumerate tenants.
//! It exists so the command engine, write-model loader, and projection
//! runtime stay independent of the backing store. Production uses the
//! `PostgreSQL` implementation, tests an in-memory one.
//!
//! Methods return boxed futures so the trait stays object-safe and can be
//! shared as `Arc<dyn EventStore>` across the command engine and every
//! projection worker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::aggregate::AggregateType;
use crate::command::Command;
use crate::error::Result;
use crate::event::StoredEvent;
use crate::query::SearchQuery;

/// Boxed future returned by [`EventStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Newest known sequences, keyed by `(aggregate_type, aggregate_id)` within
/// the queried instance. Aggregates without events are absent.
pub type LatestSequences = HashMap<(AggregateType, String), u64>;

/// Append-only event log with uniqueness-constraint side effects.
///
/// # Contract
///
/// - `push` assigns each command the next per-aggregate sequence and a
///   global position, writes every event of the batch in one transaction,
///   and applies all attached unique-constraint operations. Any conflict,
///   a raced aggregate sequence (`Conflict`) or a violated unique add
///   (`AlreadyExists`), fails the whole batch with no observable partial
///   effect. The store never retries; the command engine does.
/// - `filter` streams matching events in the query's ordering.
/// - Pushes to the same aggregate serialize; disjoint aggregates proceed in
///   parallel.
pub trait EventStore: Send + Sync {
    /// Atomically append events for one or more aggregates.
    fn push(&self, commands: Vec<Command>) -> StoreFuture<'_, Vec<StoredEvent>>;

    /// Events matching `query`, in the query's ordering.
    fn filter(&self, query: SearchQuery) -> StoreFuture<'_, Vec<StoredEvent>>;

    /// Fast path for write-model loaders: the newest sequence of every
    /// aggregate matching `query`, without materialising events.
    fn latest_sequences(&self, query: SearchQuery) -> StoreFuture<'_, LatestSequences>;

    /// Distinct instance ids with events matching `query`.
    fn instance_ids(&self, query: SearchQuery) -> StoreFuture<'_, Vec<String>>;
}
