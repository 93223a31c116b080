//! Statements: the side effects reducers plan.
//!
//! A reducer never touches storage. It returns a [`Statement`], a data
//! description of one insert/update/delete against the projection's table,
//! and the worker executes every statement of a batch inside one
//! transaction. Keeping statements as data keeps reducers pure, replayable,
//! and executable against both `PostgreSQL` and the in-memory executer used
//! in tests.

use chrono::{DateTime, Utc};

use garrison_core::event::{Position, StoredEvent};

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    I64(i64),
    /// Text.
    Text(String),
    /// Timestamp with time zone.
    Timestamp(DateTime<Utc>),
    /// Text array.
    TextArray(Vec<String>),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map_or(Self::Null, Self::Text)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::TextArray(v)
    }
}

/// One named column with its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name in the projection table.
    pub name: &'static str,
    /// Value to write.
    pub value: Value,
}

/// Shorthand constructor for a [`Column`].
pub fn col(name: &'static str, value: impl Into<Value>) -> Column {
    Column {
        name,
        value: value.into(),
    }
}

/// A row predicate; predicates in a list are AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// `column = value`
    Eq(&'static str, Value),
    /// `column = ANY(values)`
    In(&'static str, Vec<String>),
}

/// The planned side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert, replacing the existing row with the same key columns.
    Upsert {
        /// Columns forming the table's primary key; must appear in `columns`.
        key_columns: &'static [&'static str],
        /// All columns to write.
        columns: Vec<Column>,
    },
    /// Update matching rows. Updating zero rows is not an error; replays
    /// and cascades regularly target rows that are already gone.
    Update {
        /// Columns to set.
        columns: Vec<Column>,
        /// Row predicate.
        conditions: Vec<Cond>,
    },
    /// Delete matching rows. Deleting zero rows is not an error.
    Delete {
        /// Row predicate.
        conditions: Vec<Cond>,
    },
    /// Nothing to do; still advances the checkpoint.
    NoOp,
}

/// One statement planned from one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Global position of the event that produced the statement.
    pub position: Position,
    /// Per-aggregate sequence, for logging.
    pub sequence: u64,
    /// The side effect.
    pub operation: Operation,
}

impl Statement {
    /// Plan an upsert.
    #[must_use]
    pub fn upsert(
        event: &StoredEvent,
        key_columns: &'static [&'static str],
        columns: Vec<Column>,
    ) -> Self {
        Self {
            position: event.position,
            sequence: event.sequence,
            operation: Operation::Upsert {
                key_columns,
                columns,
            },
        }
    }

    /// Plan an update.
    #[must_use]
    pub fn update(event: &StoredEvent, columns: Vec<Column>, conditions: Vec<Cond>) -> Self {
        Self {
            position: event.position,
            sequence: event.sequence,
            operation: Operation::Update {
                columns,
                conditions,
            },
        }
    }

    /// Plan a delete.
    #[must_use]
    pub fn delete(event: &StoredEvent, conditions: Vec<Cond>) -> Self {
        Self {
            position: event.position,
            sequence: event.sequence,
            operation: Operation::Delete { conditions },
        }
    }

    /// Plan nothing; the checkpoint still advances past the event.
    #[must_use]
    pub fn no_op(event: &StoredEvent) -> Self {
        Self {
            position: event.position,
            sequence: event.sequence,
            operation: Operation::NoOp,
        }
    }
}
