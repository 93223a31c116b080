//! Cross-process worker coordination.
//!
//! One worker per projection per cluster: before processing, a worker takes
//! a session-scoped `PostgreSQL` advisory lock derived from the projection
//! name. The lock doubles as an ownership lease: the database releases it
//! when the holding connection dies, so a crashed worker's successor can
//! take over without operator action.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use garrison_core::{Error, Result};

/// Advisory-lock key for a projection name (FNV-1a 64, truncated into the
/// signed range `pg_try_advisory_lock` accepts).
#[must_use]
pub fn lock_key(name: &str) -> i64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    #[allow(clippy::cast_possible_wrap)]
    {
        hash as i64
    }
}

/// A held projection lease. Dropping it returns the connection to the pool,
/// which releases the advisory lock.
pub struct ProjectionLock {
    _conn: PoolConnection<Postgres>,
    key: i64,
}

impl ProjectionLock {
    /// Try to take the lease for `name`. Returns `None` when another worker
    /// holds it.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on database failure.
    pub async fn try_acquire(pool: &PgPool, name: &str) -> Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| Error::internal("LOCK-acquire-conn", e.to_string()))?;
        let key = lock_key(name);
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Error::internal("LOCK-acquire", e.to_string()))?;

        if locked {
            tracing::debug!(projection = name, key, "projection lease acquired");
            Ok(Some(Self { _conn: conn, key }))
        } else {
            Ok(None)
        }
    }

    /// The advisory-lock key this lease holds.
    #[must_use]
    pub const fn key(&self) -> i64 {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_and_distinct() {
        assert_eq!(lock_key("auth_tokens"), lock_key("auth_tokens"));
        assert_ne!(lock_key("auth_tokens"), lock_key("auth_user_sessions"));
    }
}
