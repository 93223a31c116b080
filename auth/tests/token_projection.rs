//! Token projection behavior, driven through the in-memory store and
//! statement executer.

use std::sync::Arc;

use chrono::{Duration, Utc};

use garrison_auth::token_view::{columns, TOKEN_TABLE};
use garrison_auth::TokenProjection;
use garrison_core::aggregate::{Aggregate, AggregateType};
use garrison_core::command::Command;
use garrison_core::event_store::EventStore;
use garrison_core::{EventType, Position};
use garrison_domain::project::{ApplicationAdded, ApplicationScoped, APPLICATION_ADDED};
use garrison_domain::user::{AgentScoped, ProfileChanged, TokenAdded, TokenRemoved};
use garrison_domain::{instance, org, project, user};
use garrison_projections::statement::{Cond, Value};
use garrison_projections::{subscription_query, Executer, Projection};
use garrison_testing::{InMemoryEventStore, InMemoryExecuter};

const INSTANCE: &str = "inst-1";
const ORG: &str = "org-1";

fn user_aggregate(user_id: &str) -> Aggregate {
    Aggregate::new(INSTANCE, AggregateType::User, user_id, ORG)
}

fn token_payload(token_id: &str) -> TokenAdded {
    TokenAdded {
        token_id: token_id.to_owned(),
        application_id: "client-1".to_owned(),
        user_agent_id: "agent-1".to_owned(),
        audience: vec!["proj-1".to_owned()],
        scopes: vec!["openid".to_owned()],
        expiration: Utc::now() + Duration::hours(1),
        preferred_language: "en".to_owned(),
        refresh_token_id: Some("refresh-1".to_owned()),
    }
}

async fn push_user_event<P: serde::Serialize>(
    store: &InMemoryEventStore,
    user_id: &str,
    event_type: EventType,
    payload: &P,
) {
    let command = Command::new(user_aggregate(user_id), event_type, "system")
        .with_payload(payload)
        .unwrap();
    store.push(vec![command]).await.unwrap();
}

/// Drain every event past `from` through the projection into the executer,
/// the way a worker batch would.
async fn project(
    store: &InMemoryEventStore,
    projection: &TokenProjection,
    executer: &mut InMemoryExecuter,
    from: Position,
) -> Position {
    let events = store
        .filter(subscription_query(projection, from, 1000))
        .await
        .unwrap();
    let mut last = from;
    for event in &events {
        let statement = projection.reduce(event).await.unwrap();
        executer
            .execute(projection.name(), &statement.operation)
            .await
            .unwrap();
        last = statement.position;
    }
    last
}

fn token_cond(token_id: &str) -> Vec<Cond> {
    vec![
        Cond::Eq(columns::INSTANCE_ID, Value::Text(INSTANCE.to_owned())),
        Cond::Eq(columns::TOKEN_ID, Value::Text(token_id.to_owned())),
    ]
}

#[tokio::test]
async fn token_added_materialises_a_row() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    project(&store, &projection, &mut executer, Position::beginning()).await;

    let rows = executer.find(TOKEN_TABLE, &token_cond("t1")).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(columns::USER_ID), Some(&Value::Text("U".into())));
    assert_eq!(
        rows[0].get(columns::RESOURCE_OWNER),
        Some(&Value::Text(ORG.into()))
    );
    assert_eq!(rows[0].get(columns::IS_PAT), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn org_removed_deletes_the_orgs_tokens() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    // A personal access token of the same org goes too.
    push_user_event(&store, "U", user::USER_PAT_ADDED, &token_payload("pat-1")).await;
    store
        .push(vec![Command::new(
            Aggregate::new(INSTANCE, AggregateType::Org, ORG, ORG),
            org::ORG_REMOVED,
            "admin",
        )])
        .await
        .unwrap();

    project(&store, &projection, &mut executer, Position::beginning()).await;

    assert!(executer.rows(TOKEN_TABLE).await.is_empty());
}

#[tokio::test]
async fn profile_change_updates_the_cached_language_on_all_user_tokens() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t2")).await;
    push_user_event(
        &store,
        "U",
        user::USER_HUMAN_PROFILE_CHANGED,
        &ProfileChanged {
            preferred_language: Some("de".to_owned()),
        },
    )
    .await;

    project(&store, &projection, &mut executer, Position::beginning()).await;

    for token_id in ["t1", "t2"] {
        let rows = executer.find(TOKEN_TABLE, &token_cond(token_id)).await;
        assert_eq!(
            rows[0].get(columns::PREFERRED_LANGUAGE),
            Some(&Value::Text("de".into())),
            "{token_id}"
        );
    }
}

#[tokio::test]
async fn signed_out_deletes_only_that_agents_tokens() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    let mut other_agent = token_payload("t2");
    other_agent.user_agent_id = "agent-2".to_owned();
    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &other_agent).await;
    push_user_event(
        &store,
        "U",
        user::USER_HUMAN_SIGNED_OUT,
        &AgentScoped {
            user_agent_id: "agent-1".to_owned(),
        },
    )
    .await;

    project(&store, &projection, &mut executer, Position::beginning()).await;

    assert!(executer.find(TOKEN_TABLE, &token_cond("t1")).await.is_empty());
    assert_eq!(executer.find(TOKEN_TABLE, &token_cond("t2")).await.len(), 1);
}

#[tokio::test]
async fn user_removed_deletes_every_token_of_the_user() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    push_user_event(&store, "U", user::USER_PAT_ADDED, &token_payload("pat-1")).await;
    store
        .push(vec![Command::new(
            user_aggregate("U"),
            user::USER_REMOVED,
            "admin",
        )])
        .await
        .unwrap();

    project(&store, &projection, &mut executer, Position::beginning()).await;
    assert!(executer.rows(TOKEN_TABLE).await.is_empty());
}

#[tokio::test]
async fn token_and_refresh_token_removal_delete_matching_rows() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    let mut refreshed = token_payload("t2");
    refreshed.refresh_token_id = Some("refresh-9".to_owned());
    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &refreshed).await;

    push_user_event(
        &store,
        "U",
        user::USER_TOKEN_REMOVED,
        &TokenRemoved {
            token_id: "t1".to_owned(),
        },
    )
    .await;
    push_user_event(
        &store,
        "U",
        user::USER_REFRESH_TOKEN_REMOVED,
        &TokenRemoved {
            token_id: "refresh-9".to_owned(),
        },
    )
    .await;

    project(&store, &projection, &mut executer, Position::beginning()).await;
    assert!(executer.rows(TOKEN_TABLE).await.is_empty());
}

#[tokio::test]
async fn project_removed_resolves_client_ids_and_deletes_their_tokens() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    let project_aggregate = Aggregate::new(INSTANCE, AggregateType::Project, "proj-1", ORG);
    store
        .push(vec![Command::new(
            project_aggregate.clone(),
            APPLICATION_ADDED,
            "admin",
        )
        .with_payload(&ApplicationAdded {
            app_id: "app-1".to_owned(),
            name: "web".to_owned(),
            oidc_client_id: Some("client-1".to_owned()),
        })
        .unwrap()])
        .await
        .unwrap();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    let mut foreign = token_payload("t2");
    foreign.application_id = "client-other".to_owned();
    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &foreign).await;

    store
        .push(vec![Command::new(
            project_aggregate,
            project::PROJECT_REMOVED,
            "admin",
        )])
        .await
        .unwrap();

    project(&store, &projection, &mut executer, Position::beginning()).await;

    assert!(executer.find(TOKEN_TABLE, &token_cond("t1")).await.is_empty());
    assert_eq!(executer.find(TOKEN_TABLE, &token_cond("t2")).await.len(), 1);
}

#[tokio::test]
async fn application_removed_deletes_by_payload_app_id() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    let mut token = token_payload("t1");
    token.application_id = "app-1".to_owned();
    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token).await;

    store
        .push(vec![Command::new(
            Aggregate::new(INSTANCE, AggregateType::Project, "proj-1", ORG),
            project::APPLICATION_REMOVED,
            "admin",
        )
        .with_payload(&ApplicationScoped {
            app_id: "app-1".to_owned(),
        })
        .unwrap()])
        .await
        .unwrap();

    project(&store, &projection, &mut executer, Position::beginning()).await;
    assert!(executer.rows(TOKEN_TABLE).await.is_empty());
}

#[tokio::test]
async fn instance_removed_deletes_everything_under_the_instance() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());
    let mut executer = InMemoryExecuter::new();

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    store
        .push(vec![Command::new(
            Aggregate::new(INSTANCE, AggregateType::Instance, INSTANCE, INSTANCE),
            instance::INSTANCE_REMOVED,
            "system",
        )])
        .await
        .unwrap();

    project(&store, &projection, &mut executer, Position::beginning()).await;
    assert!(executer.rows(TOKEN_TABLE).await.is_empty());
}

#[tokio::test]
async fn replay_from_zero_matches_incremental_application() {
    let store = Arc::new(InMemoryEventStore::new());
    let projection = TokenProjection::new(store.clone());

    push_user_event(&store, "U", user::USER_TOKEN_ADDED, &token_payload("t1")).await;
    push_user_event(
        &store,
        "U",
        user::USER_HUMAN_PROFILE_CHANGED,
        &ProfileChanged {
            preferred_language: Some("de".to_owned()),
        },
    )
    .await;
    push_user_event(&store, "U", user::USER_PAT_ADDED, &token_payload("pat-1")).await;

    // Incremental application, advancing the checkpoint between batches.
    let mut incremental = InMemoryExecuter::new();
    let mut checkpoint = Position::beginning();
    loop {
        let next = project(&store, &projection, &mut incremental, checkpoint).await;
        if next == checkpoint {
            break;
        }
        checkpoint = next;
    }

    // Replay: everything from the beginning, twice over.
    let mut replayed = InMemoryExecuter::new();
    project(&store, &projection, &mut replayed, Position::beginning()).await;
    project(&store, &projection, &mut replayed, Position::beginning()).await;

    let mut a = incremental.rows(TOKEN_TABLE).await;
    let mut b = replayed.rows(TOKEN_TABLE).await;
    let key = |row: &std::collections::HashMap<&'static str, Value>| match row.get(columns::TOKEN_ID)
    {
        Some(Value::Text(id)) => id.clone(),
        _ => String::new(),
    };
    a.sort_by_key(|row| key(row));
    b.sort_by_key(|row| key(row));
    assert_eq!(a, b);
}
