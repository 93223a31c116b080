//! Projection checkpoints.
//!
//! Each projection records the `(position, in_tx_order)` of the last event
//! it consumed in the shared `projection_states` table. The worker advances
//! the checkpoint in the same transaction as the batch's statements, so a
//! crash replays from the last commit: at-least-once, made safe by
//! idempotent handlers.

use sqlx::{PgPool, Postgres, Row, Transaction};

use garrison_core::{Error, Position, Result};

/// Load the checkpoint of `projection`, or the beginning when none exists.
///
/// # Errors
///
/// Returns `Internal` on database failure.
pub async fn load(pool: &PgPool, projection: &str) -> Result<Position> {
    let row = sqlx::query(
        "SELECT position, in_tx_order FROM projection_states WHERE projection_name = $1",
    )
    .bind(projection)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::internal("CHECKPOINT-load", e.to_string()))?;

    Ok(row.map_or(Position::beginning(), |row| {
        let position: i64 = row.get("position");
        let in_tx_order: i32 = row.get("in_tx_order");
        Position::new(
            u64::try_from(position).unwrap_or_default(),
            u32::try_from(in_tx_order).unwrap_or_default(),
        )
    }))
}

/// Advance the checkpoint of `projection` inside the batch transaction.
///
/// # Errors
///
/// Returns `Internal` on database failure or on a `position` that exceeds
/// the `BIGINT` range, which cannot happen with store-assigned positions.
pub async fn save(
    tx: &mut Transaction<'_, Postgres>,
    projection: &str,
    position: Position,
) -> Result<()> {
    let position_i64 = i64::try_from(position.position)
        .map_err(|e| Error::internal("CHECKPOINT-overflow", e.to_string()))?;
    let in_tx_order_i32 = i32::try_from(position.in_tx_order)
        .map_err(|e| Error::internal("CHECKPOINT-overflow", e.to_string()))?;

    sqlx::query(
        "INSERT INTO projection_states (projection_name, position, in_tx_order, updated_at)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (projection_name) DO UPDATE
         SET position = EXCLUDED.position,
             in_tx_order = EXCLUDED.in_tx_order,
             updated_at = now()",
    )
    .bind(projection)
    .bind(position_i64)
    .bind(in_tx_order_i32)
    .execute(&mut **tx)
    .await
    .map_err(|e| Error::internal("CHECKPOINT-save", e.to_string()))?;

    Ok(())
}
