//! User aggregate events.
//!
//! Two generations coexist in the log: the `user.*` v1 tags and the
//! `user.human.*` tags. Reducers treat both, so replays over old instances
//! keep working.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use garrison_core::event::{EventType, StoredEvent};
use garrison_core::registry::EventRegistry;
use garrison_core::{Error, Result};

use crate::registry::AnyEvent;

/// `user.human.added`
pub const USER_HUMAN_ADDED: EventType = EventType::from_static("user.human.added");
/// `user.token.added`
pub const USER_TOKEN_ADDED: EventType = EventType::from_static("user.token.added");
/// `user.pat.added`
pub const USER_PAT_ADDED: EventType = EventType::from_static("user.pat.added");
/// `user.profile.changed` (v1)
pub const USER_V1_PROFILE_CHANGED: EventType = EventType::from_static("user.profile.changed");
/// `user.human.profile.changed`
pub const USER_HUMAN_PROFILE_CHANGED: EventType =
    EventType::from_static("user.human.profile.changed");
/// `user.signed.out` (v1)
pub const USER_V1_SIGNED_OUT: EventType = EventType::from_static("user.signed.out");
/// `user.human.signed.out`
pub const USER_HUMAN_SIGNED_OUT: EventType = EventType::from_static("user.human.signed.out");
/// `user.locked`
pub const USER_LOCKED: EventType = EventType::from_static("user.locked");
/// `user.deactivated`
pub const USER_DEACTIVATED: EventType = EventType::from_static("user.deactivated");
/// `user.removed`; terminal.
pub const USER_REMOVED: EventType = EventType::from_static("user.removed");
/// `user.token.removed`
pub const USER_TOKEN_REMOVED: EventType = EventType::from_static("user.token.removed");
/// `user.pat.removed`
pub const USER_PAT_REMOVED: EventType = EventType::from_static("user.pat.removed");
/// `user.human.refresh.token.removed`
pub const USER_REFRESH_TOKEN_REMOVED: EventType =
    EventType::from_static("user.human.refresh.token.removed");
/// `user.human.mfa.totp.added`
pub const USER_TOTP_ADDED: EventType = EventType::from_static("user.human.mfa.totp.added");
/// `user.human.mfa.totp.verified`
pub const USER_TOTP_VERIFIED: EventType = EventType::from_static("user.human.mfa.totp.verified");
/// `user.human.mfa.totp.removed`
pub const USER_TOTP_REMOVED: EventType = EventType::from_static("user.human.mfa.totp.removed");
/// `user.human.password.check.succeeded`
pub const USER_PASSWORD_CHECK_SUCCEEDED: EventType =
    EventType::from_static("user.human.password.check.succeeded");
/// `user.human.password.check.failed`
pub const USER_PASSWORD_CHECK_FAILED: EventType =
    EventType::from_static("user.human.password.check.failed");
/// `user.human.mfa.check.succeeded`
pub const USER_MFA_CHECK_SUCCEEDED: EventType =
    EventType::from_static("user.human.mfa.check.succeeded");

/// Payload of [`USER_HUMAN_ADDED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanAdded {
    /// Login name.
    pub user_name: String,
    /// BCP-47 language tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
}

/// Payload of [`USER_TOKEN_ADDED`] and [`USER_PAT_ADDED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAdded {
    /// Token identifier.
    pub token_id: String,
    /// OIDC client the token was issued to; empty for PATs.
    #[serde(default)]
    pub application_id: String,
    /// Browser/device the token belongs to.
    #[serde(default)]
    pub user_agent_id: String,
    /// Token audience.
    #[serde(default)]
    pub audience: Vec<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Expiry.
    pub expiration: DateTime<Utc>,
    /// BCP-47 language tag cached on the token.
    #[serde(default)]
    pub preferred_language: String,
    /// Refresh token that minted this access token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_id: Option<String>,
}

/// Payload of the profile-changed events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChanged {
    /// BCP-47 language tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
}

/// Payload of the signed-out and check events: the acting user agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentScoped {
    /// Browser/device the action happened on.
    #[serde(default)]
    pub user_agent_id: String,
}

/// Payload of the token-removed events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRemoved {
    /// Removed token (or refresh token) identifier.
    pub token_id: String,
}

/// Payload of [`USER_TOTP_ADDED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpAdded {
    /// Encrypted TOTP secret; opaque to this crate.
    pub secret: String,
}

/// Decoded user event.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// Human user created.
    HumanAdded(HumanAdded),
    /// Access token issued.
    TokenAdded(TokenAdded),
    /// Personal access token issued.
    PatAdded(TokenAdded),
    /// Profile changed (v1 or human).
    ProfileChanged(ProfileChanged),
    /// Signed out on one user agent (v1 or human).
    SignedOut(AgentScoped),
    /// User locked.
    Locked,
    /// User deactivated.
    Deactivated,
    /// User removed; terminal.
    Removed,
    /// Access token revoked.
    TokenRemoved(TokenRemoved),
    /// Personal access token revoked.
    PatRemoved(TokenRemoved),
    /// Refresh token revoked.
    RefreshTokenRemoved(TokenRemoved),
    /// TOTP secret enrolled, not yet verified.
    TotpAdded(TotpAdded),
    /// TOTP enrolment verified.
    TotpVerified,
    /// TOTP removed.
    TotpRemoved,
    /// Password check succeeded on one user agent.
    PasswordCheckSucceeded(AgentScoped),
    /// Password check failed on one user agent.
    PasswordCheckFailed(AgentScoped),
    /// An MFA check succeeded on one user agent.
    MfaCheckSucceeded(AgentScoped),
}

impl UserEvent {
    /// Decode a stored user event.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable payloads or non-user tags.
    pub fn decode(event: &StoredEvent) -> Result<Self> {
        match &event.event_type {
            t if *t == USER_HUMAN_ADDED => Ok(Self::HumanAdded(event.unmarshal()?)),
            t if *t == USER_TOKEN_ADDED => Ok(Self::TokenAdded(event.unmarshal()?)),
            t if *t == USER_PAT_ADDED => Ok(Self::PatAdded(event.unmarshal()?)),
            t if *t == USER_V1_PROFILE_CHANGED || *t == USER_HUMAN_PROFILE_CHANGED => {
                Ok(Self::ProfileChanged(event.unmarshal()?))
            }
            t if *t == USER_V1_SIGNED_OUT || *t == USER_HUMAN_SIGNED_OUT => {
                Ok(Self::SignedOut(event.unmarshal()?))
            }
            t if *t == USER_LOCKED => Ok(Self::Locked),
            t if *t == USER_DEACTIVATED => Ok(Self::Deactivated),
            t if *t == USER_REMOVED => Ok(Self::Removed),
            t if *t == USER_TOKEN_REMOVED => Ok(Self::TokenRemoved(event.unmarshal()?)),
            t if *t == USER_PAT_REMOVED => Ok(Self::PatRemoved(event.unmarshal()?)),
            t if *t == USER_REFRESH_TOKEN_REMOVED => {
                Ok(Self::RefreshTokenRemoved(event.unmarshal()?))
            }
            t if *t == USER_TOTP_ADDED => Ok(Self::TotpAdded(event.unmarshal()?)),
            t if *t == USER_TOTP_VERIFIED => Ok(Self::TotpVerified),
            t if *t == USER_TOTP_REMOVED => Ok(Self::TotpRemoved),
            t if *t == USER_PASSWORD_CHECK_SUCCEEDED => {
                Ok(Self::PasswordCheckSucceeded(event.unmarshal()?))
            }
            t if *t == USER_PASSWORD_CHECK_FAILED => {
                Ok(Self::PasswordCheckFailed(event.unmarshal()?))
            }
            t if *t == USER_MFA_CHECK_SUCCEEDED => Ok(Self::MfaCheckSucceeded(event.unmarshal()?)),
            other => Err(Error::internal(
                "USER-event-unknown",
                format!("not a user event: {other}"),
            )),
        }
    }

    /// Register all user decoders.
    pub(crate) fn register(registry: &mut EventRegistry<AnyEvent>) {
        for tag in [
            USER_HUMAN_ADDED,
            USER_TOKEN_ADDED,
            USER_PAT_ADDED,
            USER_V1_PROFILE_CHANGED,
            USER_HUMAN_PROFILE_CHANGED,
            USER_V1_SIGNED_OUT,
            USER_HUMAN_SIGNED_OUT,
            USER_LOCKED,
            USER_DEACTIVATED,
            USER_REMOVED,
            USER_TOKEN_REMOVED,
            USER_PAT_REMOVED,
            USER_REFRESH_TOKEN_REMOVED,
            USER_TOTP_ADDED,
            USER_TOTP_VERIFIED,
            USER_TOTP_REMOVED,
            USER_PASSWORD_CHECK_SUCCEEDED,
            USER_PASSWORD_CHECK_FAILED,
            USER_MFA_CHECK_SUCCEEDED,
        ] {
            registry.register(tag, |e| Ok(AnyEvent::User(UserEvent::decode(e)?)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garrison_core::aggregate::{Aggregate, AggregateType};
    use garrison_core::event::Position;

    fn stored(event_type: EventType, payload: serde_json::Value) -> StoredEvent {
        StoredEvent {
            aggregate: Aggregate::new("i1", AggregateType::User, "u1", "o1"),
            event_type,
            revision: 1,
            creator: "tester".to_owned(),
            payload: Some(payload.to_string().into_bytes()),
            created_at: Utc::now(),
            sequence: 1,
            position: Position::new(1, 0),
        }
    }

    #[test]
    fn v1_and_human_signed_out_decode_alike() {
        let payload = serde_json::json!({"userAgentId": "agent-9"});
        for tag in [USER_V1_SIGNED_OUT, USER_HUMAN_SIGNED_OUT] {
            match UserEvent::decode(&stored(tag, payload.clone())).unwrap() {
                UserEvent::SignedOut(scope) => assert_eq!(scope.user_agent_id, "agent-9"),
                other => panic!("decoded {other:?}"),
            }
        }
    }

    #[test]
    fn token_added_fills_defaults() {
        let payload = serde_json::json!({
            "tokenId": "t1",
            "expiration": "2026-06-01T00:00:00Z",
        });
        match UserEvent::decode(&stored(USER_TOKEN_ADDED, payload)).unwrap() {
            UserEvent::TokenAdded(token) => {
                assert_eq!(token.token_id, "t1");
                assert!(token.application_id.is_empty());
                assert!(token.audience.is_empty());
            }
            other => panic!("decoded {other:?}"),
        }
    }
}
