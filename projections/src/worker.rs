//! The projection worker: one cooperative task per projection.
//!
//! The worker does not distinguish catch-up from live tailing; it always
//! polls: load the checkpoint, fetch the next bounded batch past it, reduce
//! each event to a statement, execute all statements plus the checkpoint
//! advance in one transaction, commit, repeat. At the head it sleeps for
//! the poll interval. A transaction only ever spans one batch, so long
//! catch-ups never hold one open.
//!
//! On failure the batch is retried with exponential backoff. When retries
//! exhaust, the worker narrows to single-event processing to isolate the
//! poison event, dead-letters it, skips it, and resumes batching.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;

use garrison_core::event_store::EventStore;
use garrison_core::{Error, Result, StoredEvent};

use crate::checkpoint;
use crate::dead_letter::DeadLetterQueue;
use crate::executer::{Executer, PostgresExecuter};
use crate::handler::{subscription_query, Projection};
use crate::lock::ProjectionLock;
use crate::statement::Statement;

/// Worker tuning knobs.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Events fetched per batch.
    pub batch_size: u64,
    /// Sleep between polls at the head of the stream.
    #[serde(with = "humantime_millis")]
    pub poll_interval: Duration,
    /// Failures of the same work item before it is dead-lettered.
    pub max_attempts: u32,
    /// First retry delay.
    #[serde(with = "humantime_millis")]
    pub initial_backoff: Duration,
    /// Retry delay cap.
    #[serde(with = "humantime_millis")]
    pub max_backoff: Duration,
    /// Delay growth per attempt.
    pub backoff_multiplier: f64,
}

mod humantime_millis {
    //! Millisecond integers in config files.
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            poll_interval: Duration::from_secs(1),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl WorkerConfig {
    /// Delay before retry number `attempt` (0-based), exponentially grown
    /// and capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(millis.min(self.max_backoff.as_millis() as f64) as u64);
        delay.min(self.max_backoff)
    }
}

/// Polling worker driving one projection.
pub struct ProjectionWorker {
    pool: PgPool,
    store: Arc<dyn EventStore>,
    projection: Arc<dyn Projection>,
    config: WorkerConfig,
    dead_letters: DeadLetterQueue,
    shutdown: watch::Receiver<bool>,
    attempts: u32,
    single_event_mode: bool,
}

impl ProjectionWorker {
    /// Create a worker and its shutdown handle. Send `true` through the
    /// returned sender to stop the worker after the current batch.
    #[must_use]
    pub fn new(
        pool: PgPool,
        store: Arc<dyn EventStore>,
        projection: Arc<dyn Projection>,
        config: WorkerConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dead_letters = DeadLetterQueue::new(pool.clone());
        let worker = Self {
            pool,
            store,
            projection,
            config,
            dead_letters,
            shutdown: shutdown_rx,
            attempts: 0,
            single_event_mode: false,
        };
        (worker, shutdown_tx)
    }

    /// Run until shutdown. Returns immediately when another worker already
    /// holds the projection's lease.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures outside the retry loop: lease
    /// acquisition and setup DDL.
    pub async fn run(mut self) -> Result<()> {
        let name = self.projection.name();
        let Some(_lease) = ProjectionLock::try_acquire(&self.pool, name).await? else {
            tracing::info!(projection = name, "another worker holds the lease, standing down");
            return Ok(());
        };

        self.setup().await?;
        tracing::info!(projection = name, "projection worker started");

        while !*self.shutdown.borrow() {
            match self.step().await {
                Ok(true) => {
                    self.attempts = 0;
                    self.single_event_mode = false;
                }
                Ok(false) => {
                    self.attempts = 0;
                    self.single_event_mode = false;
                    self.sleep(self.config.poll_interval).await;
                }
                Err(err) => self.handle_failure(&err).await?,
            }
        }

        tracing::info!(projection = name, "projection worker stopped");
        Ok(())
    }

    async fn setup(&self) -> Result<()> {
        let ddl = self.projection.setup_ddl();
        if ddl.is_empty() {
            return Ok(());
        }
        sqlx::raw_sql(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::internal("PROJ-setup", e.to_string()))?;
        Ok(())
    }

    /// Process one batch. `Ok(true)` when events were consumed, `Ok(false)`
    /// at the head of the stream.
    async fn step(&mut self) -> Result<bool> {
        let name = self.projection.name();
        let start = std::time::Instant::now();

        let checkpoint = checkpoint::load(&self.pool, name).await?;
        let batch_size = if self.single_event_mode {
            1
        } else {
            self.config.batch_size
        };
        let query = subscription_query(self.projection.as_ref(), checkpoint, batch_size);
        let events = self.store.filter(query).await?;
        if events.is_empty() {
            return Ok(false);
        }

        let mut statements: Vec<Statement> = Vec::with_capacity(events.len());
        for event in &events {
            statements.push(self.projection.reduce(event).await?);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::internal("PROJ-tx-begin", e.to_string()))?;
        {
            let mut executer = PostgresExecuter::new(&mut tx);
            for statement in &statements {
                executer.execute(name, &statement.operation).await?;
            }
        }
        // Advancing the checkpoint in the same transaction is what makes
        // replay-from-checkpoint exact.
        let last = events.last().map_or(checkpoint, |e| e.position);
        checkpoint::save(&mut tx, name, last).await?;
        tx.commit()
            .await
            .map_err(|e| Error::internal("PROJ-tx-commit", e.to_string()))?;

        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("projection.batch.event_count", "projection" => name)
            .record(events.len() as f64);
        metrics::histogram!("projection.batch.duration_seconds", "projection" => name)
            .record(start.elapsed().as_secs_f64());
        tracing::debug!(
            projection = name,
            events = events.len(),
            position = %last,
            "batch applied"
        );
        Ok(true)
    }

    async fn handle_failure(&mut self, err: &Error) -> Result<()> {
        let name = self.projection.name();
        self.attempts += 1;
        metrics::counter!("projection.batch.failures", "projection" => name).increment(1);
        tracing::warn!(
            projection = name,
            attempt = self.attempts,
            error = %err,
            "batch failed"
        );

        if self.attempts < self.config.max_attempts {
            self.sleep(self.config.backoff_for(self.attempts - 1)).await;
            return Ok(());
        }

        if !self.single_event_mode {
            // Retries exhausted on a whole batch: isolate the poison event.
            self.single_event_mode = true;
            self.attempts = 0;
            return Ok(());
        }

        // A single event kept failing: dead-letter it and move on.
        let checkpoint = checkpoint::load(&self.pool, name).await?;
        let query = subscription_query(self.projection.as_ref(), checkpoint, 1);
        let events = self.store.filter(query).await?;
        if let Some(event) = events.first() {
            self.dead_letter_and_skip(event, err).await?;
        }
        self.attempts = 0;
        self.single_event_mode = false;
        Ok(())
    }

    async fn dead_letter_and_skip(&self, event: &StoredEvent, err: &Error) -> Result<()> {
        let name = self.projection.name();
        self.dead_letters
            .record(name, event, &err.to_string(), self.config.max_attempts)
            .await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::internal("PROJ-tx-begin", e.to_string()))?;
        checkpoint::save(&mut tx, name, event.position).await?;
        tx.commit()
            .await
            .map_err(|e| Error::internal("PROJ-tx-commit", e.to_string()))?;

        metrics::counter!("projection.dead_letters", "projection" => name).increment(1);
        tracing::error!(
            projection = name,
            event_type = %event.event_type,
            position = %event.position,
            error = %err,
            "poison event dead-lettered and skipped"
        );
        Ok(())
    }

    async fn sleep(&mut self, duration: Duration) {
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = WorkerConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for(2), Duration::from_millis(400));
        assert_eq!(config.backoff_for(30), Duration::from_secs(30));
    }

    #[test]
    fn default_config_is_sane() {
        let config = WorkerConfig::default();
        assert!(config.batch_size > 0);
        assert!(config.max_attempts > 1);
        assert!(config.initial_backoff < config.max_backoff);
    }
}
