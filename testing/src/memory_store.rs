//! In-memory event store.
//!
//! Implements the full [`EventStore`] contract at memory speed: gap-free
//! per-aggregate sequences, global positions, atomic unique-constraint
//! application, and all-or-nothing batches. One mutex serialises pushes,
//! which trivially satisfies the per-aggregate serialisation guarantee.
//!
//! Sequence races cannot happen under a single lock, so conflict handling
//! is exercised through [`InMemoryEventStore::fail_next_pushes_with_conflict`],
//! which makes the next N pushes fail exactly the way a raced transaction
//! would: before any effect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use garrison_core::command::{Command, ConstraintAction};
use garrison_core::environment::{Clock, SystemClock};
use garrison_core::event_store::{EventStore, LatestSequences, StoreFuture};
use garrison_core::query::Ordering;
use garrison_core::{Error, Position, Result, SearchQuery, StoredEvent};

#[derive(Default)]
struct StoreState {
    events: Vec<StoredEvent>,
    // (instance_id, unique_type, unique_field)
    unique: HashSet<(String, String, String)>,
    position: u64,
    last_created_at: Option<DateTime<Utc>>,
    forced_conflicts: u32,
}

/// Event store backed by a `Vec` behind a mutex.
pub struct InMemoryEventStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Store reading time from the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store reading time from the given clock. Equal or regressing clock
    /// readings are nudged forward a microsecond so `created_at` stays
    /// strictly increasing.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
        }
    }

    /// Make the next `n` pushes fail with `Conflict` before any effect,
    /// the way a raced transaction would.
    pub async fn fail_next_pushes_with_conflict(&self, n: u32) {
        self.state.lock().await.forced_conflicts = n;
    }

    /// Snapshot of the live unique-constraint rows, for assertions.
    pub async fn unique_constraints(&self) -> Vec<(String, String, String)> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.unique.iter().cloned().collect();
        rows.sort();
        rows
    }

    fn next_created_at(state: &mut StoreState, clock: &dyn Clock) -> DateTime<Utc> {
        let mut now = clock.now();
        if let Some(last) = state.last_created_at {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        state.last_created_at = Some(now);
        now
    }

    fn do_push(state: &mut StoreState, clock: &dyn Clock, commands: Vec<Command>) -> Result<Vec<StoredEvent>> {
        if state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            return Err(Error::conflict(
                "STORE-conflict",
                "aggregate sequence raced with a concurrent push",
            ));
        }
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        // Validate everything against scratch copies first; nothing below
        // this block may fail.
        let mut next_sequences: HashMap<(String, String, String), u64> = HashMap::new();
        for command in &commands {
            let key = (
                command.aggregate.instance_id.clone(),
                command.aggregate.aggregate_type.as_str().to_owned(),
                command.aggregate.id.clone(),
            );
            next_sequences.entry(key).or_insert_with(|| {
                state
                    .events
                    .iter()
                    .filter(|e| {
                        e.aggregate.instance_id == command.aggregate.instance_id
                            && e.aggregate.aggregate_type == command.aggregate.aggregate_type
                            && e.aggregate.id == command.aggregate.id
                    })
                    .map(|e| e.sequence)
                    .max()
                    .unwrap_or(0)
            });
        }

        let mut unique_scratch = state.unique.clone();
        for command in &commands {
            for constraint in &command.constraints {
                let row = (
                    command.aggregate.instance_id.clone(),
                    constraint.unique_type.to_owned(),
                    constraint.unique_field.clone(),
                );
                match constraint.action {
                    ConstraintAction::Add => {
                        if !unique_scratch.insert(row) {
                            return Err(Error::already_exists(
                                constraint.violation_code,
                                format!(
                                    "{}/{} is already taken",
                                    constraint.unique_type, constraint.unique_field
                                ),
                            ));
                        }
                    }
                    ConstraintAction::Remove => {
                        unique_scratch.remove(&row);
                    }
                }
            }
        }

        // Commit.
        state.position += 1;
        let position = state.position;
        let mut pushed = Vec::with_capacity(commands.len());
        for (idx, command) in commands.into_iter().enumerate() {
            let created_at = Self::next_created_at(state, clock);
            let key = (
                command.aggregate.instance_id.clone(),
                command.aggregate.aggregate_type.as_str().to_owned(),
                command.aggregate.id.clone(),
            );
            let sequence = next_sequences
                .get_mut(&key)
                .map(|s| {
                    *s += 1;
                    *s
                })
                .unwrap_or(1);
            let event = StoredEvent {
                aggregate: command.aggregate,
                event_type: command.event_type,
                revision: command.revision,
                creator: command.creator,
                payload: command.payload,
                created_at,
                sequence,
                position: Position::new(position, u32::try_from(idx).unwrap_or(u32::MAX)),
            };
            pushed.push(event);
        }
        state.unique = unique_scratch;
        state.events.extend(pushed.iter().cloned());
        Ok(pushed)
    }

    fn do_filter(state: &StoreState, query: &SearchQuery) -> Vec<StoredEvent> {
        let mut events: Vec<StoredEvent> = state
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        match query.ordering {
            Ordering::ByAggregate => events.sort_by(|a, b| {
                (
                    &a.aggregate.instance_id,
                    a.aggregate.aggregate_type.as_str(),
                    &a.aggregate.id,
                    a.sequence,
                )
                    .cmp(&(
                        &b.aggregate.instance_id,
                        b.aggregate.aggregate_type.as_str(),
                        &b.aggregate.id,
                        b.sequence,
                    ))
            }),
            Ordering::ByPosition => events.sort_by_key(|e| e.position),
        }
        if let Some(limit) = query.limit {
            events.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        events
    }
}

impl EventStore for InMemoryEventStore {
    fn push(&self, commands: Vec<Command>) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Self::do_push(&mut state, self.clock.as_ref(), commands)
        })
    }

    fn filter(&self, query: SearchQuery) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(Self::do_filter(&state, &query))
        })
    }

    fn latest_sequences(&self, query: SearchQuery) -> StoreFuture<'_, LatestSequences> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut latest = LatestSequences::new();
            for event in state.events.iter().filter(|e| query.matches(e)) {
                let entry = latest
                    .entry((event.aggregate.aggregate_type, event.aggregate.id.clone()))
                    .or_insert(0);
                *entry = (*entry).max(event.sequence);
            }
            Ok(latest)
        })
    }

    fn instance_ids(&self, query: SearchQuery) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut ids: Vec<String> = state
                .events
                .iter()
                .filter(|e| query.matches(e))
                .map(|e| e.aggregate.instance_id.clone())
                .collect();
            ids.sort();
            ids.dedup();
            Ok(ids)
        })
    }
}
