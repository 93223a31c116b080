//! User-session projection behavior.

use std::sync::Arc;

use garrison_auth::projections::user_session::{columns, USER_SESSION_TABLE};
use garrison_auth::UserSessionProjection;
use garrison_core::aggregate::{Aggregate, AggregateType};
use garrison_core::command::Command;
use garrison_core::event_store::EventStore;
use garrison_core::{EventType, Position};
use garrison_domain::user::{self, AgentScoped};
use garrison_projections::statement::{Cond, Value};
use garrison_projections::{subscription_query, Executer, Projection};
use garrison_testing::{InMemoryEventStore, InMemoryExecuter};

const INSTANCE: &str = "inst-1";
const ORG: &str = "org-1";

async fn push_agent_event(
    store: &InMemoryEventStore,
    user_id: &str,
    agent: &str,
    event_type: EventType,
) {
    let command = Command::new(
        Aggregate::new(INSTANCE, AggregateType::User, user_id, ORG),
        event_type,
        "login-client",
    )
    .with_payload(&AgentScoped {
        user_agent_id: agent.to_owned(),
    })
    .unwrap();
    store.push(vec![command]).await.unwrap();
}

async fn project(store: &InMemoryEventStore, executer: &mut InMemoryExecuter) {
    let projection = UserSessionProjection;
    let events = store
        .filter(subscription_query(&projection, Position::beginning(), 1000))
        .await
        .unwrap();
    for event in &events {
        let statement = projection.reduce(event).await.unwrap();
        executer
            .execute(projection.name(), &statement.operation)
            .await
            .unwrap();
    }
}

fn row_cond(user_id: &str, agent: &str) -> Vec<Cond> {
    vec![
        Cond::Eq(columns::INSTANCE_ID, Value::Text(INSTANCE.to_owned())),
        Cond::Eq(columns::USER_ID, Value::Text(user_id.to_owned())),
        Cond::Eq(columns::USER_AGENT_ID, Value::Text(agent.to_owned())),
    ]
}

#[tokio::test]
async fn password_check_succeeded_materialises_a_row() {
    let store = Arc::new(InMemoryEventStore::new());
    let mut executer = InMemoryExecuter::new();

    push_agent_event(&store, "U", "agent-1", user::USER_PASSWORD_CHECK_SUCCEEDED).await;
    project(&store, &mut executer).await;

    let rows = executer
        .find(USER_SESSION_TABLE, &row_cond("U", "agent-1"))
        .await;
    assert_eq!(rows.len(), 1);
    assert!(matches!(
        rows[0].get(columns::PASSWORD_CHECKED_AT),
        Some(Value::Timestamp(_))
    ));
}

#[tokio::test]
async fn failed_password_check_clears_the_verification_time() {
    let store = Arc::new(InMemoryEventStore::new());
    let mut executer = InMemoryExecuter::new();

    push_agent_event(&store, "U", "agent-1", user::USER_PASSWORD_CHECK_SUCCEEDED).await;
    push_agent_event(&store, "U", "agent-1", user::USER_PASSWORD_CHECK_FAILED).await;
    project(&store, &mut executer).await;

    let rows = executer
        .find(USER_SESSION_TABLE, &row_cond("U", "agent-1"))
        .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get(columns::PASSWORD_CHECKED_AT),
        Some(&Value::Null)
    );
}

#[tokio::test]
async fn second_factor_check_keeps_the_password_column() {
    let store = Arc::new(InMemoryEventStore::new());
    let mut executer = InMemoryExecuter::new();

    push_agent_event(&store, "U", "agent-1", user::USER_PASSWORD_CHECK_SUCCEEDED).await;
    push_agent_event(&store, "U", "agent-1", user::USER_MFA_CHECK_SUCCEEDED).await;
    project(&store, &mut executer).await;

    let rows = executer
        .find(USER_SESSION_TABLE, &row_cond("U", "agent-1"))
        .await;
    assert_eq!(rows.len(), 1);
    assert!(matches!(
        rows[0].get(columns::PASSWORD_CHECKED_AT),
        Some(Value::Timestamp(_))
    ));
    assert!(matches!(
        rows[0].get(columns::SECOND_FACTOR_CHECKED_AT),
        Some(Value::Timestamp(_))
    ));
}

#[tokio::test]
async fn sign_out_deletes_only_that_agents_row() {
    let store = Arc::new(InMemoryEventStore::new());
    let mut executer = InMemoryExecuter::new();

    push_agent_event(&store, "U", "agent-1", user::USER_PASSWORD_CHECK_SUCCEEDED).await;
    push_agent_event(&store, "U", "agent-2", user::USER_PASSWORD_CHECK_SUCCEEDED).await;
    push_agent_event(&store, "U", "agent-1", user::USER_HUMAN_SIGNED_OUT).await;
    project(&store, &mut executer).await;

    assert!(executer
        .find(USER_SESSION_TABLE, &row_cond("U", "agent-1"))
        .await
        .is_empty());
    assert_eq!(
        executer
            .find(USER_SESSION_TABLE, &row_cond("U", "agent-2"))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn user_removed_deletes_all_rows_of_the_user() {
    let store = Arc::new(InMemoryEventStore::new());
    let mut executer = InMemoryExecuter::new();

    push_agent_event(&store, "U", "agent-1", user::USER_PASSWORD_CHECK_SUCCEEDED).await;
    push_agent_event(&store, "U", "agent-2", user::USER_PASSWORD_CHECK_SUCCEEDED).await;
    store
        .push(vec![Command::new(
            Aggregate::new(INSTANCE, AggregateType::User, "U", ORG),
            user::USER_REMOVED,
            "admin",
        )])
        .await
        .unwrap();
    project(&store, &mut executer).await;

    assert!(executer.rows(USER_SESSION_TABLE).await.is_empty());
}
