//! The token projection.
//!
//! Maintains [`auth_tokens`](crate::token_view::TOKEN_TABLE): one row per
//! live access token or personal access token. Rows appear on token-added
//! events and disappear on every event that invalidates the issuing scope:
//! token revocation, sign-out, user lock/deactivation/removal, application
//! and project lifecycle, org removal, instance removal.
//!
//! The project reducers read from the event store during planning to
//! resolve the project's OIDC client ids; that lookup is a pure function of
//! the project's history, so replaying the statement stays idempotent.

use std::sync::Arc;

use async_trait::async_trait;

use garrison_core::aggregate::AggregateType;
use garrison_core::event_store::EventStore;
use garrison_core::query::{AggregateFilter, SearchQuery};
use garrison_core::{Result, StoredEvent};
use garrison_domain::project::{self, ProjectEvent};
use garrison_domain::user::{self, TokenAdded, UserEvent};
use garrison_domain::{decode, instance, org, AnyEvent};
use garrison_projections::{col, Cond, EventInterest, Projection, Statement, Value};

use crate::token_view::{columns, TOKEN_KEY, TOKEN_TABLE, TOKEN_TABLE_DDL};

/// Reducers maintaining the token read model.
pub struct TokenProjection {
    store: Arc<dyn EventStore>,
}

impl TokenProjection {
    /// Projection reading cascade context from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    fn upsert_token(event: &StoredEvent, token: &TokenAdded, is_pat: bool) -> Statement {
        Statement::upsert(
            event,
            TOKEN_KEY,
            vec![
                col(columns::INSTANCE_ID, event.aggregate.instance_id.as_str()),
                col(columns::TOKEN_ID, token.token_id.as_str()),
                col(columns::CREATION_DATE, event.created_at),
                col(columns::CHANGE_DATE, event.created_at),
                col(
                    columns::RESOURCE_OWNER,
                    event.aggregate.resource_owner.as_str(),
                ),
                col(columns::USER_ID, event.aggregate.id.as_str()),
                col(columns::APPLICATION_ID, token.application_id.as_str()),
                col(columns::USER_AGENT_ID, token.user_agent_id.as_str()),
                col(columns::AUDIENCE, token.audience.clone()),
                col(columns::SCOPES, token.scopes.clone()),
                col(columns::EXPIRATION, token.expiration),
                col(
                    columns::PREFERRED_LANGUAGE,
                    token.preferred_language.as_str(),
                ),
                col(columns::REFRESH_TOKEN_ID, token.refresh_token_id.clone()),
                col(columns::IS_PAT, is_pat),
            ],
        )
    }

    fn instance_cond(event: &StoredEvent) -> Cond {
        Cond::Eq(
            columns::INSTANCE_ID,
            Value::Text(event.aggregate.instance_id.clone()),
        )
    }

    /// The OIDC client ids of a project, resolved from its own event
    /// history.
    async fn project_client_ids(&self, event: &StoredEvent) -> Result<Vec<String>> {
        let query = SearchQuery::builder()
            .instance_id(event.aggregate.instance_id.clone())
            .add_filter(
                AggregateFilter::aggregate_type(AggregateType::Project)
                    .aggregate_ids([event.aggregate.id.clone()])
                    .event_types([project::APPLICATION_ADDED]),
            )
            .build();
        let events = self.store.filter(query).await?;

        let mut client_ids = Vec::new();
        for event in &events {
            if let AnyEvent::Project(ProjectEvent::ApplicationAdded(app)) = decode(event)? {
                if let Some(client_id) = app.oidc_client_id {
                    client_ids.push(client_id);
                }
            }
        }
        Ok(client_ids)
    }

    fn reduce_user(event: &StoredEvent, user_event: UserEvent) -> Statement {
        match user_event {
            UserEvent::TokenAdded(token) => Self::upsert_token(event, &token, false),
            UserEvent::PatAdded(token) => Self::upsert_token(event, &token, true),
            UserEvent::ProfileChanged(profile) => match profile.preferred_language {
                Some(language) => Statement::update(
                    event,
                    vec![
                        col(columns::PREFERRED_LANGUAGE, language),
                        col(columns::CHANGE_DATE, event.created_at),
                    ],
                    vec![
                        Self::instance_cond(event),
                        Cond::Eq(columns::USER_ID, Value::Text(event.aggregate.id.clone())),
                    ],
                ),
                None => Statement::no_op(event),
            },
            UserEvent::SignedOut(scope) => Statement::delete(
                event,
                vec![
                    Self::instance_cond(event),
                    Cond::Eq(columns::USER_ID, Value::Text(event.aggregate.id.clone())),
                    Cond::Eq(columns::USER_AGENT_ID, Value::Text(scope.user_agent_id)),
                ],
            ),
            UserEvent::Locked | UserEvent::Deactivated | UserEvent::Removed => Statement::delete(
                event,
                vec![
                    Self::instance_cond(event),
                    Cond::Eq(columns::USER_ID, Value::Text(event.aggregate.id.clone())),
                ],
            ),
            UserEvent::TokenRemoved(removed) | UserEvent::PatRemoved(removed) => {
                Statement::delete(
                    event,
                    vec![
                        Self::instance_cond(event),
                        Cond::Eq(columns::TOKEN_ID, Value::Text(removed.token_id)),
                    ],
                )
            }
            UserEvent::RefreshTokenRemoved(removed) => Statement::delete(
                event,
                vec![
                    Self::instance_cond(event),
                    Cond::Eq(
                        columns::REFRESH_TOKEN_ID,
                        Value::Text(removed.token_id),
                    ),
                ],
            ),
            _ => Statement::no_op(event),
        }
    }
}

#[async_trait]
impl Projection for TokenProjection {
    fn name(&self) -> &'static str {
        TOKEN_TABLE
    }

    fn setup_ddl(&self) -> &'static str {
        TOKEN_TABLE_DDL
    }

    fn interests(&self) -> Vec<EventInterest> {
        vec![
            EventInterest::new(
                AggregateType::User,
                vec![
                    user::USER_TOKEN_ADDED,
                    user::USER_PAT_ADDED,
                    user::USER_V1_PROFILE_CHANGED,
                    user::USER_HUMAN_PROFILE_CHANGED,
                    user::USER_V1_SIGNED_OUT,
                    user::USER_HUMAN_SIGNED_OUT,
                    user::USER_LOCKED,
                    user::USER_DEACTIVATED,
                    user::USER_REMOVED,
                    user::USER_TOKEN_REMOVED,
                    user::USER_PAT_REMOVED,
                    user::USER_REFRESH_TOKEN_REMOVED,
                ],
            ),
            EventInterest::new(
                AggregateType::Project,
                vec![
                    project::APPLICATION_DEACTIVATED,
                    project::APPLICATION_REMOVED,
                    project::PROJECT_DEACTIVATED,
                    project::PROJECT_REMOVED,
                ],
            ),
            EventInterest::new(AggregateType::Org, vec![org::ORG_REMOVED]),
            EventInterest::new(AggregateType::Instance, vec![instance::INSTANCE_REMOVED]),
        ]
    }

    async fn reduce(&self, event: &StoredEvent) -> Result<Statement> {
        match decode(event)? {
            AnyEvent::User(user_event) => Ok(Self::reduce_user(event, user_event)),
            AnyEvent::Project(project_event) => match project_event {
                ProjectEvent::ApplicationDeactivated(app)
                | ProjectEvent::ApplicationRemoved(app) => Ok(Statement::delete(
                    event,
                    vec![
                        Self::instance_cond(event),
                        Cond::Eq(columns::APPLICATION_ID, Value::Text(app.app_id)),
                    ],
                )),
                ProjectEvent::Deactivated | ProjectEvent::Removed => {
                    let client_ids = self.project_client_ids(event).await?;
                    if client_ids.is_empty() {
                        return Ok(Statement::no_op(event));
                    }
                    Ok(Statement::delete(
                        event,
                        vec![
                            Self::instance_cond(event),
                            Cond::In(columns::APPLICATION_ID, client_ids),
                        ],
                    ))
                }
                _ => Ok(Statement::no_op(event)),
            },
            // Deletes all tokens of the org including PATs, which is
            // expected for now; would need revisiting if org deletion
            // becomes reversible.
            AnyEvent::Org(org::OrgEvent::Removed) => Ok(Statement::delete(
                event,
                vec![
                    Self::instance_cond(event),
                    Cond::Eq(
                        columns::RESOURCE_OWNER,
                        Value::Text(event.aggregate.id.clone()),
                    ),
                ],
            )),
            AnyEvent::Instance(instance::InstanceEvent::Removed) => {
                Ok(Statement::delete(event, vec![Self::instance_cond(event)]))
            }
            _ => Ok(Statement::no_op(event)),
        }
    }
}
