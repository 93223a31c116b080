//! Testing utilities for the Garrison workspace.
//!
//! Provides the pieces tests need to run the whole command/projection cycle
//! at memory speed and deterministically:
//!
//! - [`memory_store::InMemoryEventStore`]: the full `EventStore` contract,
//!   including unique constraints and injectable conflicts
//! - [`memory_executer::InMemoryExecuter`]: interprets projection
//!   statements against in-memory tables
//! - [`FixedClock`]: deterministic, manually advanced time
//! - [`SequentialIdGenerator`]: predictable ids (`id-1`, `id-2`, …)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory_executer;
pub mod memory_store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use garrison_core::environment::{Clock, IdGenerator};

pub use memory_executer::InMemoryExecuter;
pub use memory_store::InMemoryEventStore;

/// Deterministic clock for tests; advance it explicitly.
#[derive(Debug)]
pub struct FixedClock {
    time: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock pinned to the given instant.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(time),
        }
    }

    /// Clock pinned to 2026-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn default_test_time() -> Self {
        Self::new(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("hardcoded timestamp always parses")
                .with_timezone(&Utc),
        )
    }

    /// Move the clock forward.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned, which only happens after
    /// another test thread panicked while advancing.
    #[allow(clippy::expect_used)]
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().expect("clock lock poisoned");
        *time += by;
    }
}

impl Clock for FixedClock {
    #[allow(clippy::expect_used)]
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().expect("clock lock poisoned")
    }
}

/// Id generator yielding `id-1`, `id-2`, … in call order.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    /// Generator starting at `id-1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("id-{n}")
    }
}
