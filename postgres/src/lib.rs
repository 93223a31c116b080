//! `PostgreSQL` event store for Garrison.
//!
//! Implements the [`EventStore`] trait on top of the `eventstore.events` and
//! `eventstore.unique_constraints` tables:
//!
//! - Pushes run in one `SERIALIZABLE` transaction: the head row of every
//!   touched aggregate is locked, per-aggregate sequences are assigned
//!   gap-free, all events of the batch are inserted, and unique-constraint
//!   operations are applied. Any conflict rolls back the whole batch.
//! - Sequence races surface as `Conflict`, violated unique adds as
//!   `AlreadyExists` carrying the constraint's stable violation code.
//! - Filters compile a [`SearchQuery`] into one WHERE clause; payloads stay
//!   `JSONB`, so fields unknown to this build survive untouched.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Postgres, Row, Transaction};

use garrison_core::aggregate::{Aggregate, AggregateType};
use garrison_core::command::{Command, ConstraintAction};
use garrison_core::event_store::{EventStore, LatestSequences, StoreFuture};
use garrison_core::query::{Ordering, SearchQuery};
use garrison_core::{Error, EventType, Position, Result, StoredEvent};

/// `PostgreSQL`-backed event store.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Connect with default pool settings (max 10 connections).
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the URL is invalid or the database is
    /// unreachable.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| Error::internal("STORE-connect", e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool, e.g. one shared with projection workers.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when a migration fails to apply.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::internal("STORE-migrate", format!("migration failed: {e}")))?;
        tracing::info!("event store migrations applied");
        Ok(())
    }
}

/// Classify a database error: serialization failures and raced event
/// inserts are `Conflict`; a violated unique-constraint row is
/// `AlreadyExists` with the command's stable code.
fn map_push_error(err: &sqlx::Error, violation_code: Option<&'static str>) -> Error {
    if let sqlx::Error::Database(db_err) = err {
        match db_err.code().as_deref() {
            // serialization_failure / deadlock_detected: another push won.
            Some("40001" | "40P01") => {
                return Error::conflict("STORE-conflict", "push raced with a concurrent transaction")
            }
            Some("23505") => {
                let constraint = db_err.constraint().unwrap_or_default();
                if constraint.contains("unique_constraints") {
                    return Error::already_exists(
                        violation_code.unwrap_or("STORE-unique-violation"),
                        "unique constraint already taken",
                    );
                }
                return Error::conflict("STORE-conflict", "aggregate sequence raced");
            }
            _ => {}
        }
    }
    Error::internal("STORE-push", err.to_string())
}

async fn current_sequence(
    tx: &mut Transaction<'_, Postgres>,
    aggregate: &Aggregate,
) -> Result<u64> {
    // Locks the aggregate's head row so concurrent pushes to the same
    // aggregate serialize; a first-event race is caught by the primary key.
    let row: Option<i64> = sqlx::query_scalar(
        "SELECT sequence FROM eventstore.events
         WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
         ORDER BY sequence DESC LIMIT 1
         FOR UPDATE",
    )
    .bind(&aggregate.instance_id)
    .bind(aggregate.aggregate_type.as_str())
    .bind(&aggregate.id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_push_error(&e, None))?;

    Ok(row.and_then(|s| u64::try_from(s).ok()).unwrap_or(0))
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent> {
    let aggregate_type: String = row.get("aggregate_type");
    let payload: Option<serde_json::Value> = row.get("payload");
    let payload = payload
        .map(|v| serde_json::to_vec(&v))
        .transpose()
        .map_err(|e| Error::internal("STORE-payload", e.to_string()))?;
    let sequence: i64 = row.get("sequence");
    let global_sequence: i64 = row.get("global_sequence");
    let in_tx_order: i32 = row.get("in_tx_order");
    let revision: i16 = row.get("revision");

    Ok(StoredEvent {
        aggregate: Aggregate::new(
            row.get::<String, _>("instance_id"),
            AggregateType::from_str(&aggregate_type)?,
            row.get::<String, _>("aggregate_id"),
            row.get::<String, _>("resource_owner"),
        ),
        event_type: EventType::from(row.get::<String, _>("event_type")),
        revision: u16::try_from(revision).unwrap_or_default(),
        creator: row.get("creator"),
        payload,
        created_at: row.get("created_at"),
        sequence: u64::try_from(sequence).unwrap_or_default(),
        position: Position::new(
            u64::try_from(global_sequence).unwrap_or_default(),
            u32::try_from(in_tx_order).unwrap_or_default(),
        ),
    })
}

// ── filter compilation ────────────────────────────────────────────────

/// Owned bind values collected while compiling a query.
enum Arg {
    Text(String),
    TextArray(Vec<String>),
    I64(i64),
    Timestamp(DateTime<Utc>),
}

struct Compiled {
    where_clause: String,
    args: Vec<Arg>,
}

fn compile_where(query: &SearchQuery) -> Compiled {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Arg> = Vec::new();
    let mut n = 0usize;
    let mut next = |args: &mut Vec<Arg>, arg: Arg| {
        args.push(arg);
        n += 1;
        n
    };

    if let Some(instance_id) = &query.instance_id {
        let i = next(&mut args, Arg::Text(instance_id.clone()));
        clauses.push(format!("instance_id = ${i}"));
    }
    if let Some(owner) = &query.resource_owner {
        let i = next(&mut args, Arg::Text(owner.clone()));
        clauses.push(format!("resource_owner = ${i}"));
    }
    if let Some(creator) = &query.creator {
        let i = next(&mut args, Arg::Text(creator.clone()));
        clauses.push(format!("creator = ${i}"));
    }
    if let Some(position) = query.position_after {
        let p = next(
            &mut args,
            Arg::I64(i64::try_from(position.position).unwrap_or(i64::MAX)),
        );
        let o = next(
            &mut args,
            Arg::I64(i64::from(position.in_tx_order)),
        );
        clauses.push(format!(
            "(global_sequence > ${p} OR (global_sequence = ${p} AND in_tx_order > ${o}))"
        ));
    }
    if let Some(from) = query.created_after {
        let i = next(&mut args, Arg::Timestamp(from));
        clauses.push(format!("created_at >= ${i}"));
    }
    if let Some(to) = query.created_before {
        let i = next(&mut args, Arg::Timestamp(to));
        clauses.push(format!("created_at < ${i}"));
    }
    if let Some(from) = query.sequence_from {
        let i = next(&mut args, Arg::I64(i64::try_from(from).unwrap_or(i64::MAX)));
        clauses.push(format!("sequence >= ${i}"));
    }
    if let Some(to) = query.sequence_to {
        let i = next(&mut args, Arg::I64(i64::try_from(to).unwrap_or(i64::MAX)));
        clauses.push(format!("sequence <= ${i}"));
    }

    if !query.filters.is_empty() {
        let mut alternatives: Vec<String> = Vec::new();
        for filter in &query.filters {
            let mut parts: Vec<String> = Vec::new();
            if let Some(typ) = filter.aggregate_type {
                let i = next(&mut args, Arg::Text(typ.as_str().to_owned()));
                parts.push(format!("aggregate_type = ${i}"));
            }
            if !filter.aggregate_ids.is_empty() {
                let i = next(&mut args, Arg::TextArray(filter.aggregate_ids.clone()));
                parts.push(format!("aggregate_id = ANY(${i})"));
            }
            if !filter.event_types.is_empty() {
                let types = filter
                    .event_types
                    .iter()
                    .map(|t| t.as_str().to_owned())
                    .collect();
                let i = next(&mut args, Arg::TextArray(types));
                parts.push(format!("event_type = ANY(${i})"));
            }
            if parts.is_empty() {
                parts.push("TRUE".to_owned());
            }
            alternatives.push(format!("({})", parts.join(" AND ")));
        }
        clauses.push(format!("({})", alternatives.join(" OR ")));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Compiled { where_clause, args }
}

fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [Arg],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            Arg::Text(v) => query.bind(v.as_str()),
            Arg::TextArray(v) => query.bind(v.as_slice()),
            Arg::I64(v) => query.bind(*v),
            Arg::Timestamp(v) => query.bind(*v),
        };
    }
    query
}

const EVENT_COLUMNS: &str = "instance_id, aggregate_type, aggregate_id, sequence, \
     global_sequence, in_tx_order, event_type, payload, creator, resource_owner, \
     revision, created_at";

impl PostgresEventStore {
    async fn do_push(&self, commands: Vec<Command>) -> Result<Vec<StoredEvent>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let start = std::time::Instant::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::internal("STORE-tx-begin", e.to_string()))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::internal("STORE-tx-isolation", e.to_string()))?;

        // Assign sequences under the aggregate head locks.
        let mut next_sequences: HashMap<(String, String, String), u64> = HashMap::new();
        for command in &commands {
            let key = (
                command.aggregate.instance_id.clone(),
                command.aggregate.aggregate_type.as_str().to_owned(),
                command.aggregate.id.clone(),
            );
            if !next_sequences.contains_key(&key) {
                let current = current_sequence(&mut tx, &command.aggregate).await?;
                next_sequences.insert(key, current);
            }
        }

        let mut pushed = Vec::with_capacity(commands.len());
        for (idx, command) in commands.iter().enumerate() {
            let key = (
                command.aggregate.instance_id.clone(),
                command.aggregate.aggregate_type.as_str().to_owned(),
                command.aggregate.id.clone(),
            );
            let sequence = {
                let entry = next_sequences.entry(key).or_insert(0);
                *entry += 1;
                *entry
            };
            let payload_text = match &command.payload {
                Some(bytes) => Some(
                    String::from_utf8(bytes.clone())
                        .map_err(|e| Error::internal("STORE-payload-utf8", e.to_string()))?,
                ),
                None => None,
            };

            let row = sqlx::query(
                "INSERT INTO eventstore.events
                 (instance_id, aggregate_type, aggregate_id, sequence, in_tx_order,
                  event_type, payload, creator, resource_owner, revision)
                 VALUES ($1, $2, $3, $4, $5, $6, ($7)::jsonb, $8, $9, $10)
                 RETURNING global_sequence, created_at",
            )
            .bind(&command.aggregate.instance_id)
            .bind(command.aggregate.aggregate_type.as_str())
            .bind(&command.aggregate.id)
            .bind(i64::try_from(sequence).unwrap_or(i64::MAX))
            .bind(i32::try_from(idx).unwrap_or(i32::MAX))
            .bind(command.event_type.as_str())
            .bind(payload_text)
            .bind(&command.creator)
            .bind(&command.aggregate.resource_owner)
            .bind(i16::try_from(command.revision).unwrap_or(i16::MAX))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_push_error(&e, None))?;

            let global_sequence: i64 = row.get("global_sequence");
            let created_at: DateTime<Utc> = row.get("created_at");
            pushed.push(StoredEvent {
                aggregate: command.aggregate.clone(),
                event_type: command.event_type.clone(),
                revision: command.revision,
                creator: command.creator.clone(),
                payload: command.payload.clone(),
                created_at,
                sequence,
                position: Position::new(
                    u64::try_from(global_sequence).unwrap_or_default(),
                    u32::try_from(idx).unwrap_or_default(),
                ),
            });
        }

        // Unique-constraint side effects, same transaction.
        for command in &commands {
            for constraint in &command.constraints {
                match constraint.action {
                    ConstraintAction::Add => {
                        sqlx::query(
                            "INSERT INTO eventstore.unique_constraints
                             (instance_id, unique_type, unique_field)
                             VALUES ($1, $2, $3)",
                        )
                        .bind(&command.aggregate.instance_id)
                        .bind(constraint.unique_type)
                        .bind(&constraint.unique_field)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_push_error(&e, Some(constraint.violation_code)))?;
                    }
                    ConstraintAction::Remove => {
                        sqlx::query(
                            "DELETE FROM eventstore.unique_constraints
                             WHERE instance_id = $1 AND unique_type = $2 AND unique_field = $3",
                        )
                        .bind(&command.aggregate.instance_id)
                        .bind(constraint.unique_type)
                        .bind(&constraint.unique_field)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_push_error(&e, None))?;
                    }
                }
            }
        }

        tx.commit().await.map_err(|e| map_push_error(&e, None))?;

        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("eventstore.push.event_count").record(pushed.len() as f64);
        metrics::histogram!("eventstore.push.duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::debug!(events = pushed.len(), "pushed events");
        Ok(pushed)
    }

    async fn do_filter(&self, query: SearchQuery) -> Result<Vec<StoredEvent>> {
        let start = std::time::Instant::now();
        let compiled = compile_where(&query);
        let order = match query.ordering {
            Ordering::ByAggregate => {
                "ORDER BY instance_id, aggregate_type, aggregate_id, sequence"
            }
            Ordering::ByPosition => "ORDER BY global_sequence, in_tx_order",
        };
        let limit = query
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM eventstore.events{} {order}{limit}",
            compiled.where_clause
        );

        let rows = bind_args(sqlx::query(&sql), &compiled.args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::internal("STORE-filter", e.to_string()))?;

        let events: Vec<StoredEvent> = rows
            .iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>>>()?;

        metrics::histogram!("eventstore.filter.duration_seconds")
            .record(start.elapsed().as_secs_f64());
        Ok(events)
    }

    async fn do_latest_sequences(&self, query: SearchQuery) -> Result<LatestSequences> {
        let compiled = compile_where(&query);
        let sql = format!(
            "SELECT aggregate_type, aggregate_id, MAX(sequence) AS sequence
             FROM eventstore.events{}
             GROUP BY aggregate_type, aggregate_id",
            compiled.where_clause
        );

        let rows = bind_args(sqlx::query(&sql), &compiled.args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::internal("STORE-latest", e.to_string()))?;

        let mut latest = LatestSequences::new();
        for row in rows {
            let aggregate_type: String = row.get("aggregate_type");
            let sequence: i64 = row.get("sequence");
            latest.insert(
                (
                    AggregateType::from_str(&aggregate_type)?,
                    row.get("aggregate_id"),
                ),
                u64::try_from(sequence).unwrap_or_default(),
            );
        }
        Ok(latest)
    }

    async fn do_instance_ids(&self, query: SearchQuery) -> Result<Vec<String>> {
        let compiled = compile_where(&query);
        let sql = format!(
            "SELECT DISTINCT instance_id FROM eventstore.events{} ORDER BY instance_id",
            compiled.where_clause
        );
        let rows = bind_args(sqlx::query(&sql), &compiled.args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::internal("STORE-instances", e.to_string()))?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("instance_id"))
            .collect())
    }
}

impl EventStore for PostgresEventStore {
    fn push(&self, commands: Vec<Command>) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(self.do_push(commands))
    }

    fn filter(&self, query: SearchQuery) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(self.do_filter(query))
    }

    fn latest_sequences(&self, query: SearchQuery) -> StoreFuture<'_, LatestSequences> {
        Box::pin(self.do_latest_sequences(query))
    }

    fn instance_ids(&self, query: SearchQuery) -> StoreFuture<'_, Vec<String>> {
        Box::pin(self.do_instance_ids(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garrison_core::query::AggregateFilter;

    #[test]
    fn postgres_event_store_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PostgresEventStore>();
        assert_sync::<PostgresEventStore>();
    }

    #[test]
    fn compile_where_numbers_placeholders_in_order() {
        let query = SearchQuery::builder()
            .instance_id("i1")
            .resource_owner("o1")
            .add_filter(
                AggregateFilter::aggregate_type(AggregateType::User).aggregate_ids(["u1", "u2"]),
            )
            .build();
        let compiled = compile_where(&query);
        assert_eq!(
            compiled.where_clause,
            " WHERE instance_id = $1 AND resource_owner = $2 \
             AND ((aggregate_type = $3 AND aggregate_id = ANY($4)))"
        );
        assert_eq!(compiled.args.len(), 4);
    }

    #[test]
    fn compile_where_position_is_lexicographic() {
        let query = SearchQuery::builder()
            .position_after(Position::new(7, 2))
            .build();
        let compiled = compile_where(&query);
        assert_eq!(
            compiled.where_clause,
            " WHERE (global_sequence > $1 OR (global_sequence = $1 AND in_tx_order > $2))"
        );
    }

    #[test]
    fn empty_query_has_no_where_clause() {
        let compiled = compile_where(&SearchQuery::default());
        assert!(compiled.where_clause.is_empty());
        assert!(compiled.args.is_empty());
    }
}
