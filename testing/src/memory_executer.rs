//! In-memory statement executer.
//!
//! Interprets projection [`Operation`]s against plain maps, so reducer
//! tests can assert on materialised rows without a database. Semantics
//! mirror the SQL executer: upserts key on the declared key columns,
//! updates and deletes match zero or more rows without error.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use garrison_core::Result;
use garrison_projections::statement::{Cond, Operation, Statement, Value};
use garrison_projections::Executer;

/// One materialised row: column name to value.
pub type Row = HashMap<&'static str, Value>;

/// Tables of rows, keyed by projection name.
#[derive(Default)]
pub struct InMemoryExecuter {
    tables: Mutex<HashMap<String, Vec<Row>>>,
}

fn matches(row: &Row, conditions: &[Cond]) -> bool {
    conditions.iter().all(|cond| match cond {
        Cond::Eq(column, value) => row.get(column) == Some(value),
        Cond::In(column, values) => match row.get(column) {
            Some(Value::Text(text)) => values.contains(text),
            _ => false,
        },
    })
}

impl InMemoryExecuter {
    /// Empty executer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every statement of a batch, as the worker would inside one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible to match [`Executer`].
    pub async fn apply_all(&mut self, table: &str, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.execute(table, &statement.operation).await?;
        }
        Ok(())
    }

    /// All rows of a table, for assertions.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Rows of a table matching the conditions, for assertions.
    pub async fn find(&self, table: &str, conditions: &[Cond]) -> Vec<Row> {
        self.rows(table)
            .await
            .into_iter()
            .filter(|row| matches(row, conditions))
            .collect()
    }
}

#[async_trait]
impl Executer for InMemoryExecuter {
    async fn execute(&mut self, table: &str, operation: &Operation) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_owned()).or_default();
        match operation {
            Operation::NoOp => {}
            Operation::Upsert {
                key_columns,
                columns,
            } => {
                let new_row: Row = columns.iter().map(|c| (c.name, c.value.clone())).collect();
                let same_key = |row: &Row| {
                    key_columns
                        .iter()
                        .all(|key| row.get(key) == new_row.get(key))
                };
                if let Some(existing) = rows.iter_mut().find(|row| same_key(row)) {
                    // ON CONFLICT DO UPDATE semantics: only the provided
                    // columns are overwritten.
                    for (name, value) in new_row {
                        existing.insert(name, value);
                    }
                } else {
                    rows.push(new_row);
                }
            }
            Operation::Update {
                columns,
                conditions,
            } => {
                for row in rows.iter_mut().filter(|row| matches(row, conditions)) {
                    for column in columns {
                        row.insert(column.name, column.value.clone());
                    }
                }
            }
            Operation::Delete { conditions } => {
                rows.retain(|row| !matches(row, conditions));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garrison_projections::col;

    fn upsert(token_id: &str, user_id: &str) -> Operation {
        Operation::Upsert {
            key_columns: &["token_id"],
            columns: vec![col("token_id", token_id), col("user_id", user_id)],
        }
    }

    #[tokio::test]
    async fn upsert_merges_by_key() {
        let mut executer = InMemoryExecuter::new();
        executer.execute("tokens", &upsert("t1", "u1")).await.unwrap();
        executer.execute("tokens", &upsert("t1", "u2")).await.unwrap();

        let rows = executer.rows("tokens").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("user_id"), Some(&Value::Text("u2".into())));
    }

    #[tokio::test]
    async fn upsert_keeps_columns_it_does_not_provide() {
        let mut executer = InMemoryExecuter::new();
        executer.execute("tokens", &upsert("t1", "u1")).await.unwrap();
        executer
            .execute(
                "tokens",
                &Operation::Upsert {
                    key_columns: &["token_id"],
                    columns: vec![col("token_id", "t1"), col("language", "en")],
                },
            )
            .await
            .unwrap();

        let rows = executer.rows("tokens").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("user_id"), Some(&Value::Text("u1".into())));
        assert_eq!(rows[0].get("language"), Some(&Value::Text("en".into())));
    }

    #[tokio::test]
    async fn delete_with_in_condition() {
        let mut executer = InMemoryExecuter::new();
        executer.execute("tokens", &upsert("t1", "u1")).await.unwrap();
        executer.execute("tokens", &upsert("t2", "u2")).await.unwrap();

        executer
            .execute(
                "tokens",
                &Operation::Delete {
                    conditions: vec![Cond::In("token_id", vec!["t1".into(), "t9".into()])],
                },
            )
            .await
            .unwrap();

        let rows = executer.rows("tokens").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("token_id"), Some(&Value::Text("t2".into())));
    }

    #[tokio::test]
    async fn update_matches_zero_rows_without_error() {
        let mut executer = InMemoryExecuter::new();
        executer
            .execute(
                "tokens",
                &Operation::Update {
                    columns: vec![col("user_id", "u9")],
                    conditions: vec![Cond::Eq("token_id", Value::Text("absent".into()))],
                },
            )
            .await
            .unwrap();
        assert!(executer.rows("tokens").await.is_empty());
    }
}
