//! Shared fixtures: a command engine over the in-memory store with stub
//! verifiers and deterministic time and ids.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use garrison_command::providers::{
    PasswordVerifier, TotpVerifier, WebAuthnOutcome, WebAuthnVerifier,
};
use garrison_command::{CommandConfig, Commands};
use garrison_core::aggregate::{Aggregate, AggregateType};
use garrison_core::command::Command;
use garrison_core::event_store::EventStore;
use garrison_core::{Error, Result};
use garrison_domain::session::WebAuthnChallenged;
use garrison_domain::user::{
    HumanAdded, TotpAdded, USER_HUMAN_ADDED, USER_TOTP_ADDED, USER_TOTP_VERIFIED,
};
use garrison_testing::{FixedClock, InMemoryEventStore, SequentialIdGenerator};

pub const INSTANCE: &str = "inst-1";
pub const ORG: &str = "org-1";

/// Accepts exactly one password.
pub struct StubPasswords;

#[async_trait]
impl PasswordVerifier for StubPasswords {
    async fn verify(&self, _instance_id: &str, _user_id: &str, password: &str) -> Result<()> {
        if password == "correct-password" {
            Ok(())
        } else {
            Err(Error::invalid_argument(
                "PASSWORD-invalid",
                "password does not match",
            ))
        }
    }
}

/// Accepts exactly one code per secret.
pub struct StubTotp;

impl TotpVerifier for StubTotp {
    fn verify(&self, _secret: &str, code: &str) -> Result<()> {
        if code == "424242" {
            Ok(())
        } else {
            Err(Error::invalid_argument("TOTP-invalid", "code does not match"))
        }
    }
}

/// Verifies an assertion when it echoes the challenge nonce; reads
/// `userVerified` from the assertion so tests steer the outcome.
pub struct StubWebAuthn;

impl WebAuthnVerifier for StubWebAuthn {
    fn verify_assertion(
        &self,
        challenge: &WebAuthnChallenged,
        assertion: &Value,
    ) -> Result<WebAuthnOutcome> {
        if assertion["challenge"] != Value::String(challenge.challenge.clone()) {
            return Err(Error::invalid_argument(
                "WEBAUTHN-assertion-invalid",
                "assertion does not answer the challenge",
            ));
        }
        Ok(WebAuthnOutcome {
            user_verified: assertion["userVerified"].as_bool().unwrap_or(false),
        })
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryEventStore>,
    pub clock: Arc<FixedClock>,
    pub commands: Commands,
}

#[must_use]
pub fn fixture() -> Fixture {
    let clock = Arc::new(FixedClock::default_test_time());
    let store = Arc::new(InMemoryEventStore::with_clock(clock.clone()));
    let commands = Commands::builder(store.clone())
        .clock(clock.clone())
        .id_generator(Arc::new(SequentialIdGenerator::new()))
        .webauthn(Arc::new(StubWebAuthn))
        .passwords(Arc::new(StubPasswords))
        .totp(Arc::new(StubTotp))
        .config(CommandConfig::default())
        .build();
    Fixture {
        store,
        clock,
        commands,
    }
}

/// Append an active human user to the log.
pub async fn seed_user(store: &InMemoryEventStore, user_id: &str) {
    let command = Command::new(
        Aggregate::new(INSTANCE, AggregateType::User, user_id, ORG),
        USER_HUMAN_ADDED,
        "system",
    )
    .with_payload(&HumanAdded {
        user_name: format!("{user_id}@example.com"),
        preferred_language: None,
    })
    .unwrap();
    store.push(vec![command]).await.unwrap();
}

/// Append a verified TOTP enrolment for a user.
pub async fn seed_totp(store: &InMemoryEventStore, user_id: &str) {
    let aggregate = Aggregate::new(INSTANCE, AggregateType::User, user_id, ORG);
    let added = Command::new(aggregate.clone(), USER_TOTP_ADDED, "system")
        .with_payload(&TotpAdded {
            secret: "enrolled-secret".to_owned(),
        })
        .unwrap();
    let verified = Command::new(aggregate, USER_TOTP_VERIFIED, "system");
    store.push(vec![added, verified]).await.unwrap();
}
