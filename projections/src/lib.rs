//! Projection runtime for the Garrison identity platform.
//!
//! Projections are the query side of the platform's CQRS core: reducers
//! consume the event stream in global-position order and maintain
//! materialised views. This crate provides the runtime around them:
//!
//! | Piece | Role |
//! |-------|------|
//! | [`handler::Projection`] | A projection value: name, interests, `reduce` |
//! | [`statement::Statement`] | Planned side effect, executed inside the batch transaction |
//! | [`executer::Executer`] | Interprets statements (`PostgreSQL` or in-memory) |
//! | [`checkpoint`] | `(position, in_tx_order)` progress tracking |
//! | [`worker::ProjectionWorker`] | Polling loop with backoff and dead-lettering |
//! | [`lock::ProjectionLock`] | One-worker-per-projection advisory lease |
//!
//! Guarantees: at-least-once delivery, strict per-projection ordering, no
//! cross-projection ordering. Handlers must be idempotent under replay from
//! any earlier checkpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod dead_letter;
pub mod executer;
pub mod handler;
pub mod lock;
pub mod statement;
pub mod worker;

pub use dead_letter::{DeadLetterQueue, FailedEvent, FailedEventStatus};
pub use executer::{Executer, PostgresExecuter};
pub use handler::{subscription_query, EventInterest, Projection};
pub use statement::{col, Column, Cond, Operation, Statement, Value};
pub use worker::{ProjectionWorker, WorkerConfig};
