//! Dead-letter table for poison events.
//!
//! An event that keeps failing the same projection is recorded here and
//! skipped, so one broken payload cannot stall the stream. Entries carry
//! everything an operator needs to investigate and either resolve (after a
//! fix and manual replay) or discard.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use garrison_core::{Error, Position, Result, StoredEvent};

/// Status of a dead-lettered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedEventStatus {
    /// Awaiting investigation.
    Pending,
    /// Reprocessed successfully after a fix.
    Resolved,
    /// Permanently dropped.
    Discarded,
}

impl FailedEventStatus {
    /// Database string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database string form.
    ///
    /// # Errors
    ///
    /// Returns `Internal` for unknown strings.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(Error::internal(
                "DLQ-status",
                format!("invalid failed event status: {s}"),
            )),
        }
    }
}

/// One dead-lettered event.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// Row id.
    pub id: i64,
    /// Projection that failed.
    pub projection_name: String,
    /// Tenant of the event.
    pub instance_id: String,
    /// Event type tag.
    pub event_type: String,
    /// Global position of the event.
    pub position: Position,
    /// Error of the last attempt.
    pub error: String,
    /// Attempts before giving up.
    pub attempts: i32,
    /// When the event was dead-lettered.
    pub failed_at: DateTime<Utc>,
    /// Current status.
    pub status: FailedEventStatus,
}

/// Access to the `projection_failed_events` table.
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Queue over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a poison event. Called by the worker right before skipping it.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on database failure.
    pub async fn record(
        &self,
        projection_name: &str,
        event: &StoredEvent,
        error: &str,
        attempts: u32,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO projection_failed_events
             (projection_name, instance_id, aggregate_type, aggregate_id, sequence,
              position, in_tx_order, event_type, payload, error, attempts, failed_at, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now(), 'pending')",
        )
        .bind(projection_name)
        .bind(&event.aggregate.instance_id)
        .bind(event.aggregate.aggregate_type.as_str())
        .bind(&event.aggregate.id)
        .bind(i64::try_from(event.sequence).unwrap_or(i64::MAX))
        .bind(i64::try_from(event.position.position).unwrap_or(i64::MAX))
        .bind(i32::try_from(event.position.in_tx_order).unwrap_or(i32::MAX))
        .bind(event.event_type.as_str())
        .bind(event.payload.as_deref())
        .bind(error)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::internal("DLQ-record", e.to_string()))?;
        Ok(())
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on database failure.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<FailedEvent>> {
        let rows = sqlx::query(
            "SELECT id, projection_name, instance_id, event_type, position, in_tx_order,
                    error, attempts, failed_at, status
             FROM projection_failed_events
             WHERE status = 'pending'
             ORDER BY failed_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::internal("DLQ-list", e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let position: i64 = row.get("position");
                let in_tx_order: i32 = row.get("in_tx_order");
                Ok(FailedEvent {
                    id: row.get("id"),
                    projection_name: row.get("projection_name"),
                    instance_id: row.get("instance_id"),
                    event_type: row.get("event_type"),
                    position: Position::new(
                        u64::try_from(position).unwrap_or_default(),
                        u32::try_from(in_tx_order).unwrap_or_default(),
                    ),
                    error: row.get("error"),
                    attempts: row.get("attempts"),
                    failed_at: row.get("failed_at"),
                    status: FailedEventStatus::parse(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the id does not name a pending entry.
    pub async fn resolve(&self, id: i64) -> Result<()> {
        self.set_status(id, FailedEventStatus::Resolved).await
    }

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the id does not name a pending entry.
    pub async fn discard(&self, id: i64) -> Result<()> {
        self.set_status(id, FailedEventStatus::Discarded).await
    }

    async fn set_status(&self, id: i64, status: FailedEventStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE projection_failed_events SET status = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::internal("DLQ-update", e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(
                "DLQ-entry-not-found",
                format!("no pending failed event with id {id}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            FailedEventStatus::Pending,
            FailedEventStatus::Resolved,
            FailedEventStatus::Discarded,
        ] {
            assert_eq!(FailedEventStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(FailedEventStatus::parse("exploded").is_err());
    }
}
