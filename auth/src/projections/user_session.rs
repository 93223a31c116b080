//! The user-session projection.
//!
//! Maintains `auth_user_sessions`: one row per `(instance, user agent,
//! user)` with the latest password and second-factor verification times,
//! fed by the user aggregate's check events. Sign-out and the user/org/
//! instance terminal events drop the affected rows.

use async_trait::async_trait;

use garrison_core::aggregate::AggregateType;
use garrison_core::{Result, StoredEvent};
use garrison_domain::user::{self, AgentScoped, UserEvent};
use garrison_domain::{decode, instance, org, AnyEvent};
use garrison_projections::{col, Cond, Column, EventInterest, Projection, Statement, Value};

/// Table maintained by this projection.
pub const USER_SESSION_TABLE: &str = "auth_user_sessions";

/// Column names of [`USER_SESSION_TABLE`].
pub mod columns {
    /// Tenant.
    pub const INSTANCE_ID: &str = "instance_id";
    /// Browser/device.
    pub const USER_AGENT_ID: &str = "user_agent_id";
    /// User.
    pub const USER_ID: &str = "user_id";
    /// Org owning the user.
    pub const RESOURCE_OWNER: &str = "resource_owner";
    /// Last change time.
    pub const CHANGE_DATE: &str = "change_date";
    /// Last successful password check; NULL after a failed one.
    pub const PASSWORD_CHECKED_AT: &str = "password_checked_at";
    /// Last successful second-factor check.
    pub const SECOND_FACTOR_CHECKED_AT: &str = "second_factor_checked_at";
}

const KEY: &[&str] = &[
    columns::INSTANCE_ID,
    columns::USER_AGENT_ID,
    columns::USER_ID,
];

/// Setup DDL of the user-session projection.
pub const USER_SESSION_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS auth_user_sessions (
    instance_id              TEXT        NOT NULL,
    user_agent_id            TEXT        NOT NULL,
    user_id                  TEXT        NOT NULL,
    resource_owner           TEXT        NOT NULL,
    change_date              TIMESTAMPTZ NOT NULL,
    password_checked_at      TIMESTAMPTZ,
    second_factor_checked_at TIMESTAMPTZ,

    PRIMARY KEY (instance_id, user_agent_id, user_id)
);
CREATE INDEX IF NOT EXISTS auth_user_sessions_user_idx
    ON auth_user_sessions (instance_id, user_id);
CREATE INDEX IF NOT EXISTS auth_user_sessions_owner_idx
    ON auth_user_sessions (instance_id, resource_owner);
";

/// Reducers maintaining the user-session read model.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserSessionProjection;

impl UserSessionProjection {
    fn key_columns(event: &StoredEvent, scope: &AgentScoped) -> Vec<Column> {
        vec![
            col(columns::INSTANCE_ID, event.aggregate.instance_id.as_str()),
            col(columns::USER_AGENT_ID, scope.user_agent_id.as_str()),
            col(columns::USER_ID, event.aggregate.id.as_str()),
            col(
                columns::RESOURCE_OWNER,
                event.aggregate.resource_owner.as_str(),
            ),
            col(columns::CHANGE_DATE, event.created_at),
        ]
    }

    fn user_conds(event: &StoredEvent) -> Vec<Cond> {
        vec![
            Cond::Eq(
                columns::INSTANCE_ID,
                Value::Text(event.aggregate.instance_id.clone()),
            ),
            Cond::Eq(columns::USER_ID, Value::Text(event.aggregate.id.clone())),
        ]
    }
}

#[async_trait]
impl Projection for UserSessionProjection {
    fn name(&self) -> &'static str {
        USER_SESSION_TABLE
    }

    fn setup_ddl(&self) -> &'static str {
        USER_SESSION_TABLE_DDL
    }

    fn interests(&self) -> Vec<EventInterest> {
        vec![
            EventInterest::new(
                AggregateType::User,
                vec![
                    user::USER_PASSWORD_CHECK_SUCCEEDED,
                    user::USER_PASSWORD_CHECK_FAILED,
                    user::USER_MFA_CHECK_SUCCEEDED,
                    user::USER_V1_SIGNED_OUT,
                    user::USER_HUMAN_SIGNED_OUT,
                    user::USER_LOCKED,
                    user::USER_DEACTIVATED,
                    user::USER_REMOVED,
                ],
            ),
            EventInterest::new(AggregateType::Org, vec![org::ORG_REMOVED]),
            EventInterest::new(AggregateType::Instance, vec![instance::INSTANCE_REMOVED]),
        ]
    }

    async fn reduce(&self, event: &StoredEvent) -> Result<Statement> {
        match decode(event)? {
            AnyEvent::User(UserEvent::PasswordCheckSucceeded(scope)) => {
                let mut cols = Self::key_columns(event, &scope);
                cols.push(col(columns::PASSWORD_CHECKED_AT, event.created_at));
                Ok(Statement::upsert(event, KEY, cols))
            }
            AnyEvent::User(UserEvent::PasswordCheckFailed(scope)) => {
                let mut cols = Self::key_columns(event, &scope);
                cols.push(Column {
                    name: columns::PASSWORD_CHECKED_AT,
                    value: Value::Null,
                });
                Ok(Statement::upsert(event, KEY, cols))
            }
            AnyEvent::User(UserEvent::MfaCheckSucceeded(scope)) => {
                let mut cols = Self::key_columns(event, &scope);
                cols.push(col(columns::SECOND_FACTOR_CHECKED_AT, event.created_at));
                Ok(Statement::upsert(event, KEY, cols))
            }
            AnyEvent::User(UserEvent::SignedOut(scope)) => Ok(Statement::delete(
                event,
                vec![
                    Cond::Eq(
                        columns::INSTANCE_ID,
                        Value::Text(event.aggregate.instance_id.clone()),
                    ),
                    Cond::Eq(columns::USER_ID, Value::Text(event.aggregate.id.clone())),
                    Cond::Eq(columns::USER_AGENT_ID, Value::Text(scope.user_agent_id)),
                ],
            )),
            AnyEvent::User(UserEvent::Locked | UserEvent::Deactivated | UserEvent::Removed) => {
                Ok(Statement::delete(event, Self::user_conds(event)))
            }
            AnyEvent::Org(org::OrgEvent::Removed) => Ok(Statement::delete(
                event,
                vec![
                    Cond::Eq(
                        columns::INSTANCE_ID,
                        Value::Text(event.aggregate.instance_id.clone()),
                    ),
                    Cond::Eq(
                        columns::RESOURCE_OWNER,
                        Value::Text(event.aggregate.id.clone()),
                    ),
                ],
            )),
            AnyEvent::Instance(instance::InstanceEvent::Removed) => Ok(Statement::delete(
                event,
                vec![Cond::Eq(
                    columns::INSTANCE_ID,
                    Value::Text(event.aggregate.instance_id.clone()),
                )],
            )),
            _ => Ok(Statement::no_op(event)),
        }
    }
}
