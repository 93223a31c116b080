//! End-to-end session ceremonies against the in-memory event store.

mod support;

use std::collections::HashMap;

use serde_json::json;

use garrison_command::session_checks::{
    CheckCode, CheckIntent, CheckPassword, CheckUser, CheckWebAuthn, Challenges, Checks,
    RequestOtp, RequestWebAuthn,
};
use garrison_command::providers::UserVerification;
use garrison_command::{CreateSessionRequest, DeleteSessionRequest, SetSessionRequest};
use garrison_core::aggregate::AggregateType;
use garrison_core::environment::Clock;
use garrison_core::event_store::EventStore;
use garrison_core::query::{AggregateFilter, SearchQuery};
use garrison_core::ErrorKind;
use garrison_domain::session::{SESSION_ADDED, SESSION_TERMINATED};

use support::{fixture, seed_totp, seed_user, INSTANCE, ORG};

fn create_request() -> CreateSessionRequest {
    CreateSessionRequest {
        instance_id: INSTANCE.to_owned(),
        resource_owner: ORG.to_owned(),
        creator: "login-client".to_owned(),
        ..CreateSessionRequest::default()
    }
}

fn set_request(session_id: &str, token: &str) -> SetSessionRequest {
    SetSessionRequest {
        instance_id: INSTANCE.to_owned(),
        session_id: session_id.to_owned(),
        session_token: token.to_owned(),
        creator: "login-client".to_owned(),
        ..SetSessionRequest::default()
    }
}

async fn session_events(
    store: &garrison_testing::InMemoryEventStore,
    session_id: &str,
) -> Vec<garrison_core::StoredEvent> {
    store
        .filter(
            SearchQuery::builder()
                .instance_id(INSTANCE)
                .add_filter(
                    AggregateFilter::aggregate_type(AggregateType::Session)
                        .aggregate_ids([session_id]),
                )
                .build(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn create_empty_then_check_user() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.metadata = HashMap::from([("foo".to_owned(), "bar".to_owned())]);
    let created = f.commands.create_session(request).await.unwrap();
    assert_eq!(created.details.resource_owner, ORG);
    assert!(created.details.sequence > 0);

    let mut set = set_request(&created.session_id, &created.session_token);
    set.checks = Checks {
        user: Some(CheckUser {
            user_id: "U".to_owned(),
        }),
        ..Checks::default()
    };
    let updated = f.commands.set_session(set).await.unwrap();
    assert!(updated.details.sequence > created.details.sequence);

    // The rotated token works; the first one is dead.
    let err = f
        .commands
        .get_session(INSTANCE, &created.session_id, &created.session_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);

    let view = f
        .commands
        .get_session(INSTANCE, &created.session_id, &updated.session_token)
        .await
        .unwrap();
    assert_eq!(view.metadata["foo"], "bar");
    let (user_id, user_org, factor) = view.factors.user.expect("user factor recorded");
    assert_eq!(user_id, "U");
    assert_eq!(user_org, ORG);
    assert_eq!(factor.verified_at, f.clock.now());
}

#[tokio::test]
async fn password_without_user_is_rejected_without_events() {
    let f = fixture();

    let mut request = create_request();
    request.checks = Checks {
        password: Some(CheckPassword {
            password: "correct-password".to_owned(),
        }),
        ..Checks::default()
    };
    let err = f.commands.create_session(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.code(), "SESSION-user-not-checked");

    // Nothing was pushed for any session aggregate.
    let events = f
        .store
        .filter(
            SearchQuery::builder()
                .instance_id(INSTANCE)
                .add_filter(AggregateFilter::aggregate_type(AggregateType::Session))
                .build(),
        )
        .await
        .unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn password_after_user_records_the_factor() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks {
        user: Some(CheckUser {
            user_id: "U".to_owned(),
        }),
        password: Some(CheckPassword {
            password: "correct-password".to_owned(),
        }),
        ..Checks::default()
    };
    let created = f.commands.create_session(request).await.unwrap();

    let view = f
        .commands
        .get_session(INSTANCE, &created.session_id, &created.session_token)
        .await
        .unwrap();
    assert!(view.factors.user.is_some());
    assert!(view.factors.password.is_some());
}

#[tokio::test]
async fn webauthn_with_required_user_verification() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks::user("U");
    request.challenges = Challenges {
        webauthn: Some(RequestWebAuthn {
            domain: "example".to_owned(),
            user_verification: UserVerification::Required,
        }),
        ..Challenges::default()
    };
    let created = f.commands.create_session(request).await.unwrap();
    let options = created.challenges.webauthn.expect("challenge options");
    let nonce = options["publicKey"]["challenge"].as_str().unwrap().to_owned();
    assert_eq!(options["publicKey"]["rpId"], "example");
    assert_eq!(options["publicKey"]["userVerification"], "required");

    let assertion = json!({"challenge": nonce, "userVerified": true});
    let mut set = set_request(&created.session_id, &created.session_token);
    set.checks = Checks {
        webauthn: Some(CheckWebAuthn {
            assertion: assertion.clone(),
        }),
        ..Checks::default()
    };
    let updated = f.commands.set_session(set).await.unwrap();

    let view = f
        .commands
        .get_session(INSTANCE, &created.session_id, &updated.session_token)
        .await
        .unwrap();
    let (_, user_verified) = view.factors.webauthn.expect("webauthn factor");
    assert!(user_verified);
    assert!(view.webauthn_challenge.is_none(), "challenge consumed");

    // The challenge is single-use.
    let mut replay = set_request(&created.session_id, &updated.session_token);
    replay.checks = Checks {
        webauthn: Some(CheckWebAuthn { assertion }),
        ..Checks::default()
    };
    let err = f.commands.set_session(replay).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.code(), "SESSION-webauthn-no-challenge");
}

#[tokio::test]
async fn webauthn_without_user_verification_is_rejected_when_required() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks::user("U");
    request.challenges = Challenges {
        webauthn: Some(RequestWebAuthn {
            domain: "example".to_owned(),
            user_verification: UserVerification::Required,
        }),
        ..Challenges::default()
    };
    let created = f.commands.create_session(request).await.unwrap();
    let options = created.challenges.webauthn.unwrap();
    let nonce = options["publicKey"]["challenge"].as_str().unwrap();

    let mut set = set_request(&created.session_id, &created.session_token);
    set.checks = Checks {
        webauthn: Some(CheckWebAuthn {
            assertion: json!({"challenge": nonce, "userVerified": false}),
        }),
        ..Checks::default()
    };
    let err = f.commands.set_session(set).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.code(), "SESSION-webauthn-verification-required");

    // No factor was recorded: the session still answers to the old token
    // and shows no webauthn factor.
    let view = f
        .commands
        .get_session(INSTANCE, &created.session_id, &created.session_token)
        .await
        .unwrap();
    assert!(view.factors.webauthn.is_none());
}

#[tokio::test]
async fn intent_without_linked_user_fails_until_linked() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks::user("U");
    let created = f.commands.create_session(request).await.unwrap();

    let intent_id = f
        .commands
        .start_idp_intent(INSTANCE, ORG, "idp-github", "login-client")
        .await
        .unwrap();
    let intent_token = f
        .commands
        .succeed_idp_intent(INSTANCE, &intent_id, "external-7", None, "idp-callback")
        .await
        .unwrap();

    let mut set = set_request(&created.session_id, &created.session_token);
    set.checks = Checks {
        intent: Some(CheckIntent {
            intent_id: intent_id.clone(),
            intent_token: intent_token.clone(),
        }),
        ..Checks::default()
    };
    let err = f.commands.set_session(set).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.code(), "INTENT-user-missing");

    f.commands
        .link_idp_intent_user(INSTANCE, &intent_id, "U", "idp-callback")
        .await
        .unwrap();

    let mut retry = set_request(&created.session_id, &created.session_token);
    retry.checks = Checks {
        intent: Some(CheckIntent {
            intent_id,
            intent_token,
        }),
        ..Checks::default()
    };
    let updated = f.commands.set_session(retry).await.unwrap();
    let view = f
        .commands
        .get_session(INSTANCE, &created.session_id, &updated.session_token)
        .await
        .unwrap();
    assert!(view.factors.intent.is_some());
}

#[tokio::test]
async fn intent_with_wrong_token_is_rejected() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let created = f
        .commands
        .create_session({
            let mut r = create_request();
            r.checks = Checks::user("U");
            r
        })
        .await
        .unwrap();

    let intent_id = f
        .commands
        .start_idp_intent(INSTANCE, ORG, "idp-github", "login-client")
        .await
        .unwrap();
    f.commands
        .succeed_idp_intent(INSTANCE, &intent_id, "external-7", Some("U"), "idp-callback")
        .await
        .unwrap();

    let mut set = set_request(&created.session_id, &created.session_token);
    set.checks = Checks {
        intent: Some(CheckIntent {
            intent_id,
            intent_token: "forged".to_owned(),
        }),
        ..Checks::default()
    };
    let err = f.commands.set_session(set).await.unwrap_err();
    assert_eq!(err.code(), "INTENT-token-invalid");
}

#[tokio::test]
async fn otp_sms_challenge_and_check() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks::user("U");
    request.challenges = Challenges {
        otp_sms: Some(RequestOtp { return_code: true }),
        ..Challenges::default()
    };
    let created = f.commands.create_session(request).await.unwrap();
    let code = created.challenges.otp_sms.expect("code returned");

    // Wrong code first; the challenge survives.
    let mut wrong = set_request(&created.session_id, &created.session_token);
    wrong.checks = Checks {
        otp_sms: Some(CheckCode {
            code: "000000".to_owned(),
        }),
        ..Checks::default()
    };
    let err = f.commands.set_session(wrong).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let mut set = set_request(&created.session_id, &created.session_token);
    set.checks = Checks {
        otp_sms: Some(CheckCode { code: code.clone() }),
        ..Checks::default()
    };
    let updated = f.commands.set_session(set).await.unwrap();

    // Consumed: the same code cannot verify twice.
    let mut replay = set_request(&created.session_id, &updated.session_token);
    replay.checks = Checks {
        otp_sms: Some(CheckCode { code }),
        ..Checks::default()
    };
    let err = f.commands.set_session(replay).await.unwrap_err();
    assert_eq!(err.code(), "SESSION-otp-no-challenge");
}

#[tokio::test]
async fn totp_check_uses_the_enrolled_secret() {
    let f = fixture();
    seed_user(&f.store, "U").await;
    seed_totp(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks {
        user: Some(CheckUser {
            user_id: "U".to_owned(),
        }),
        totp: Some(CheckCode {
            code: "424242".to_owned(),
        }),
        ..Checks::default()
    };
    let created = f.commands.create_session(request).await.unwrap();

    let view = f
        .commands
        .get_session(INSTANCE, &created.session_id, &created.session_token)
        .await
        .unwrap();
    assert!(view.factors.totp.is_some());
}

#[tokio::test]
async fn totp_without_enrolment_is_a_precondition_failure() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks {
        user: Some(CheckUser {
            user_id: "U".to_owned(),
        }),
        totp: Some(CheckCode {
            code: "424242".to_owned(),
        }),
        ..Checks::default()
    };
    let err = f.commands.create_session(request).await.unwrap_err();
    assert_eq!(err.code(), "TOTP-not-ready");
}

#[tokio::test]
async fn delete_then_access() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let mut request = create_request();
    request.checks = Checks::user("U");
    let created = f.commands.create_session(request).await.unwrap();

    f.commands
        .delete_session(DeleteSessionRequest {
            instance_id: INSTANCE.to_owned(),
            session_id: created.session_id.clone(),
            session_token: created.session_token.clone(),
            creator: "login-client".to_owned(),
        })
        .await
        .unwrap();

    let err = f
        .commands
        .get_session(INSTANCE, &created.session_id, &created.session_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);

    // The log starts with session.added and ends with session.terminated.
    let events = session_events(&f.store, &created.session_id).await;
    assert_eq!(events.first().unwrap().event_type, SESSION_ADDED);
    assert_eq!(events.last().unwrap().event_type, SESSION_TERMINATED);

    // No further events can be appended.
    let before = events.len();
    let err = f
        .commands
        .set_session(set_request(&created.session_id, &created.session_token))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.code(), "SESSION-terminated");
    assert_eq!(session_events(&f.store, &created.session_id).await.len(), before);
}

#[tokio::test]
async fn every_successful_set_rotates_the_token() {
    let f = fixture();
    seed_user(&f.store, "U").await;

    let created = f.commands.create_session(create_request()).await.unwrap();
    let mut token = created.session_token.clone();
    for _ in 0..3 {
        let updated = f
            .commands
            .set_session(set_request(&created.session_id, &token))
            .await
            .unwrap();
        assert_ne!(updated.session_token, token);
        let err = f
            .commands
            .get_session(INSTANCE, &created.session_id, &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        token = updated.session_token;
    }
}

#[tokio::test]
async fn expired_token_is_unauthenticated() {
    let f = fixture();
    let created = f.commands.create_session(create_request()).await.unwrap();

    f.clock.advance(chrono::Duration::hours(25));
    let err = f
        .commands
        .get_session(INSTANCE, &created.session_id, &created.session_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn conflicts_are_retried_then_surface_as_precondition_failures() {
    let f = fixture();
    let created = f.commands.create_session(create_request()).await.unwrap();

    // One transient conflict: the engine reloads and succeeds.
    f.store.fail_next_pushes_with_conflict(1).await;
    let updated = f
        .commands
        .set_session(set_request(&created.session_id, &created.session_token))
        .await
        .unwrap();

    // Persistent conflicts: bounded retries, then FailedPrecondition.
    f.store.fail_next_pushes_with_conflict(10).await;
    let err = f
        .commands
        .set_session(set_request(&created.session_id, &updated.session_token))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.code(), "COMMAND-conflict-exhausted");
}

#[tokio::test]
async fn get_session_with_unknown_id_is_not_found() {
    let f = fixture();
    let err = f
        .commands
        .get_session(INSTANCE, "no-such-session", "token")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
