//! Statement execution.
//!
//! The [`Executer`] trait interprets planned [`Operation`]s against a
//! projection table. Production uses [`PostgresExecuter`] inside the
//! worker's batch transaction; tests use the in-memory executer from
//! `garrison-testing`.

use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Transaction};

use garrison_core::{Error, Result};

use crate::statement::{Cond, Operation, Value};

/// Applies operations to a projection table.
#[async_trait]
pub trait Executer: Send {
    /// Apply one operation to `table`.
    async fn execute(&mut self, table: &str, operation: &Operation) -> Result<()>;
}

/// Executer writing through an open `PostgreSQL` transaction.
///
/// Table names come from [`Projection::name`](crate::handler::Projection::name)
/// declarations, never from input, so interpolating them is safe.
pub struct PostgresExecuter<'a, 'c> {
    tx: &'a mut Transaction<'c, Postgres>,
}

impl<'a, 'c> PostgresExecuter<'a, 'c> {
    /// Wrap an open transaction.
    pub fn new(tx: &'a mut Transaction<'c, Postgres>) -> Self {
        Self { tx }
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::I64(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Timestamp(v) => query.bind(*v),
        Value::TextArray(v) => query.bind(v.as_slice()),
    }
}

fn push_conditions(sql: &mut String, conditions: &[Cond], mut placeholder: usize) {
    if conditions.is_empty() {
        return;
    }
    sql.push_str(" WHERE ");
    for (i, cond) in conditions.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        match cond {
            Cond::Eq(column, _) => {
                sql.push_str(&format!("{column} = ${placeholder}"));
            }
            Cond::In(column, _) => {
                sql.push_str(&format!("{column} = ANY(${placeholder})"));
            }
        }
        placeholder += 1;
    }
}

fn bind_conditions<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    conditions: &'q [Cond],
) -> Query<'q, Postgres, PgArguments> {
    for cond in conditions {
        query = match cond {
            Cond::Eq(_, value) => bind_value(query, value),
            Cond::In(_, values) => query.bind(values.as_slice()),
        };
    }
    query
}

#[async_trait]
impl Executer for PostgresExecuter<'_, '_> {
    async fn execute(&mut self, table: &str, operation: &Operation) -> Result<()> {
        match operation {
            Operation::NoOp => Ok(()),
            Operation::Upsert {
                key_columns,
                columns,
            } => {
                let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
                let placeholders: Vec<String> =
                    (1..=columns.len()).map(|i| format!("${i}")).collect();
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| !key_columns.contains(&c.name))
                    .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
                    .collect();
                let conflict_action = if updates.is_empty() {
                    "NOTHING".to_owned()
                } else {
                    format!("UPDATE SET {}", updates.join(", "))
                };
                let sql = format!(
                    "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO {conflict_action}",
                    names.join(", "),
                    placeholders.join(", "),
                    key_columns.join(", "),
                );
                let mut query = sqlx::query(&sql);
                for column in columns {
                    query = bind_value(query, &column.value);
                }
                query
                    .execute(&mut **self.tx)
                    .await
                    .map_err(|e| Error::internal("PROJ-upsert", e.to_string()))?;
                Ok(())
            }
            Operation::Update {
                columns,
                conditions,
            } => {
                let sets: Vec<String> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{} = ${}", c.name, i + 1))
                    .collect();
                let mut sql = format!("UPDATE {table} SET {}", sets.join(", "));
                push_conditions(&mut sql, conditions, columns.len() + 1);
                let mut query = sqlx::query(&sql);
                for column in columns {
                    query = bind_value(query, &column.value);
                }
                query = bind_conditions(query, conditions);
                query
                    .execute(&mut **self.tx)
                    .await
                    .map_err(|e| Error::internal("PROJ-update", e.to_string()))?;
                Ok(())
            }
            Operation::Delete { conditions } => {
                let mut sql = format!("DELETE FROM {table}");
                push_conditions(&mut sql, conditions, 1);
                let mut query = sqlx::query(&sql);
                query = bind_conditions(query, conditions);
                query
                    .execute(&mut **self.tx)
                    .await
                    .map_err(|e| Error::internal("PROJ-delete", e.to_string()))?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_sql_uses_shifted_placeholders() {
        let mut sql = String::from("UPDATE t SET a = $1");
        push_conditions(
            &mut sql,
            &[
                Cond::Eq("user_id", Value::Text("u".into())),
                Cond::In("application_id", vec!["c1".into()]),
            ],
            2,
        );
        assert_eq!(
            sql,
            "UPDATE t SET a = $1 WHERE user_id = $2 AND application_id = ANY($3)"
        );
    }
}
