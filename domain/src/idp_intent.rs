//! IdP intent aggregate events.
//!
//! An intent tracks one external identity-provider handshake. It succeeds
//! with the external user's id and an intent token; the matching platform
//! user may be linked at success time or afterwards. The session intent
//! check verifies the supplied `(intent_id, intent_token)` pair against the
//! stored hash.

use serde::{Deserialize, Serialize};

use garrison_core::event::{EventType, StoredEvent};
use garrison_core::registry::EventRegistry;
use garrison_core::{Error, Result};

use crate::registry::AnyEvent;

/// `idpintent.started`
pub const INTENT_STARTED: EventType = EventType::from_static("idpintent.started");
/// `idpintent.succeeded`
pub const INTENT_SUCCEEDED: EventType = EventType::from_static("idpintent.succeeded");
/// `idpintent.failed`
pub const INTENT_FAILED: EventType = EventType::from_static("idpintent.failed");
/// `idpintent.linked`
pub const INTENT_LINKED: EventType = EventType::from_static("idpintent.linked");

/// Payload of [`INTENT_STARTED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentStarted {
    /// The identity provider being used.
    pub idp_id: String,
}

/// Payload of [`INTENT_SUCCEEDED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSucceeded {
    /// The user id at the external provider.
    pub idp_user_id: String,
    /// The linked platform user; empty when no link exists yet.
    #[serde(default)]
    pub user_id: String,
    /// SHA-256 of the intent token, hex.
    pub token_hash: String,
}

/// Payload of [`INTENT_FAILED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentFailed {
    /// Provider-reported reason.
    #[serde(default)]
    pub reason: String,
}

/// Payload of [`INTENT_LINKED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentLinked {
    /// The platform user now linked to the intent.
    pub user_id: String,
}

/// Decoded intent event.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentEvent {
    /// Handshake started.
    Started(IntentStarted),
    /// Handshake succeeded.
    Succeeded(IntentSucceeded),
    /// Handshake failed.
    Failed(IntentFailed),
    /// Platform user linked after the fact.
    Linked(IntentLinked),
}

impl IntentEvent {
    /// Decode a stored intent event.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable payloads or non-intent tags.
    pub fn decode(event: &StoredEvent) -> Result<Self> {
        match &event.event_type {
            t if *t == INTENT_STARTED => Ok(Self::Started(event.unmarshal()?)),
            t if *t == INTENT_SUCCEEDED => Ok(Self::Succeeded(event.unmarshal()?)),
            t if *t == INTENT_FAILED => Ok(Self::Failed(event.unmarshal()?)),
            t if *t == INTENT_LINKED => Ok(Self::Linked(event.unmarshal()?)),
            other => Err(Error::internal(
                "INTENT-event-unknown",
                format!("not an idp intent event: {other}"),
            )),
        }
    }

    pub(crate) fn register(registry: &mut EventRegistry<AnyEvent>) {
        for tag in [INTENT_STARTED, INTENT_SUCCEEDED, INTENT_FAILED, INTENT_LINKED] {
            registry.register(tag, |e| Ok(AnyEvent::Intent(IntentEvent::decode(e)?)));
        }
    }
}
