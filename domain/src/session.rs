//! Session aggregate events.
//!
//! The session aggregate records an authentication ceremony: creation,
//! factor checks, pending challenges, token rotation, termination. Factor
//! events carry the `verified_at` timestamp the write model exposes;
//! challenge events store the server-side half of a pending proof.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use garrison_core::event::{EventType, StoredEvent};
use garrison_core::registry::EventRegistry;
use garrison_core::{Error, Result};

use crate::registry::AnyEvent;

/// `session.added`
pub const SESSION_ADDED: EventType = EventType::from_static("session.added");
/// `session.user.checked`
pub const SESSION_USER_CHECKED: EventType = EventType::from_static("session.user.checked");
/// `session.password.checked`
pub const SESSION_PASSWORD_CHECKED: EventType = EventType::from_static("session.password.checked");
/// `session.totp.checked`
pub const SESSION_TOTP_CHECKED: EventType = EventType::from_static("session.totp.checked");
/// `session.otp_sms.challenged`
pub const SESSION_OTP_SMS_CHALLENGED: EventType =
    EventType::from_static("session.otp_sms.challenged");
/// `session.otp_sms.checked`
pub const SESSION_OTP_SMS_CHECKED: EventType = EventType::from_static("session.otp_sms.checked");
/// `session.otp_email.challenged`
pub const SESSION_OTP_EMAIL_CHALLENGED: EventType =
    EventType::from_static("session.otp_email.challenged");
/// `session.otp_email.checked`
pub const SESSION_OTP_EMAIL_CHECKED: EventType =
    EventType::from_static("session.otp_email.checked");
/// `session.webauthn.challenged`
pub const SESSION_WEBAUTHN_CHALLENGED: EventType =
    EventType::from_static("session.webauthn.challenged");
/// `session.webauthn.checked`
pub const SESSION_WEBAUTHN_CHECKED: EventType = EventType::from_static("session.webauthn.checked");
/// `session.intent.checked`
pub const SESSION_INTENT_CHECKED: EventType = EventType::from_static("session.intent.checked");
/// `session.token.set`
pub const SESSION_TOKEN_SET: EventType = EventType::from_static("session.token.set");
/// `session.metadata.set`
pub const SESSION_METADATA_SET: EventType = EventType::from_static("session.metadata.set");
/// `session.terminated`; terminal, no event may follow it.
pub const SESSION_TERMINATED: EventType = EventType::from_static("session.terminated");

/// Payload of [`SESSION_ADDED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAdded {
    /// Caller-supplied metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// User agent fingerprint, when the transport forwards one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent_id: Option<String>,
}

/// Payload of [`SESSION_USER_CHECKED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChecked {
    /// The user the session now belongs to.
    pub user_id: String,
    /// The user's organisation.
    pub user_resource_owner: String,
    /// When the check passed.
    pub checked_at: DateTime<Utc>,
}

/// Shared payload of the plain factor-check events (password, TOTP, OTP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checked {
    /// When the check passed.
    pub checked_at: DateTime<Utc>,
}

/// Payload of the OTP challenge events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpChallenged {
    /// SHA-256 of the generated code, hex.
    pub code_hash: String,
    /// Challenge expiry.
    pub expiry: DateTime<Utc>,
    /// Whether the code is returned to the caller instead of being handed
    /// to the notification dispatcher.
    #[serde(default)]
    pub return_code: bool,
}

/// Payload of [`SESSION_WEBAUTHN_CHALLENGED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnChallenged {
    /// Base64url challenge nonce.
    pub challenge: String,
    /// Relying-party domain the assertion must match.
    pub allowed_domain: String,
    /// Whether the authenticator must verify the user (PIN/biometric).
    pub user_verification_required: bool,
    /// Public credential-request options handed to the client.
    pub credential_request_options: serde_json::Value,
}

/// Payload of [`SESSION_WEBAUTHN_CHECKED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnChecked {
    /// When the assertion verified.
    pub checked_at: DateTime<Utc>,
    /// Whether the authenticator verified the user.
    pub user_verified: bool,
}

/// Payload of [`SESSION_INTENT_CHECKED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentChecked {
    /// The consumed intent.
    pub intent_id: String,
    /// When the check passed.
    pub checked_at: DateTime<Utc>,
}

/// Payload of [`SESSION_TOKEN_SET`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    /// SHA-256 of the session token, hex. The token itself is never stored.
    pub token_hash: String,
    /// Token (and session) expiry.
    pub expiration: DateTime<Utc>,
}

/// Payload of [`SESSION_METADATA_SET`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSet {
    /// Replacement metadata map.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Decoded session event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session created.
    Added(SessionAdded),
    /// User factor established.
    UserChecked(UserChecked),
    /// Password factor verified.
    PasswordChecked(Checked),
    /// TOTP factor verified.
    TotpChecked(Checked),
    /// OTP-SMS challenge opened.
    OtpSmsChallenged(OtpChallenged),
    /// OTP-SMS factor verified.
    OtpSmsChecked(Checked),
    /// OTP-Email challenge opened.
    OtpEmailChallenged(OtpChallenged),
    /// OTP-Email factor verified.
    OtpEmailChecked(Checked),
    /// WebAuthn challenge opened.
    WebAuthnChallenged(WebAuthnChallenged),
    /// WebAuthn assertion verified, challenge consumed.
    WebAuthnChecked(WebAuthnChecked),
    /// IdP intent verified.
    IntentChecked(IntentChecked),
    /// Token rotated.
    TokenSet(TokenSet),
    /// Metadata replaced.
    MetadataSet(MetadataSet),
    /// Session terminated; terminal.
    Terminated,
}

impl SessionEvent {
    /// Decode a stored session event.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable payloads or non-session tags.
    pub fn decode(event: &StoredEvent) -> Result<Self> {
        match &event.event_type {
            t if *t == SESSION_ADDED => Ok(Self::Added(event.unmarshal()?)),
            t if *t == SESSION_USER_CHECKED => Ok(Self::UserChecked(event.unmarshal()?)),
            t if *t == SESSION_PASSWORD_CHECKED => Ok(Self::PasswordChecked(event.unmarshal()?)),
            t if *t == SESSION_TOTP_CHECKED => Ok(Self::TotpChecked(event.unmarshal()?)),
            t if *t == SESSION_OTP_SMS_CHALLENGED => Ok(Self::OtpSmsChallenged(event.unmarshal()?)),
            t if *t == SESSION_OTP_SMS_CHECKED => Ok(Self::OtpSmsChecked(event.unmarshal()?)),
            t if *t == SESSION_OTP_EMAIL_CHALLENGED => {
                Ok(Self::OtpEmailChallenged(event.unmarshal()?))
            }
            t if *t == SESSION_OTP_EMAIL_CHECKED => Ok(Self::OtpEmailChecked(event.unmarshal()?)),
            t if *t == SESSION_WEBAUTHN_CHALLENGED => {
                Ok(Self::WebAuthnChallenged(event.unmarshal()?))
            }
            t if *t == SESSION_WEBAUTHN_CHECKED => Ok(Self::WebAuthnChecked(event.unmarshal()?)),
            t if *t == SESSION_INTENT_CHECKED => Ok(Self::IntentChecked(event.unmarshal()?)),
            t if *t == SESSION_TOKEN_SET => Ok(Self::TokenSet(event.unmarshal()?)),
            t if *t == SESSION_METADATA_SET => Ok(Self::MetadataSet(event.unmarshal()?)),
            t if *t == SESSION_TERMINATED => Ok(Self::Terminated),
            other => Err(Error::internal(
                "SESSION-event-unknown",
                format!("not a session event: {other}"),
            )),
        }
    }

    /// Register all session decoders.
    pub(crate) fn register(registry: &mut EventRegistry<AnyEvent>) {
        for tag in [
            SESSION_ADDED,
            SESSION_USER_CHECKED,
            SESSION_PASSWORD_CHECKED,
            SESSION_TOTP_CHECKED,
            SESSION_OTP_SMS_CHALLENGED,
            SESSION_OTP_SMS_CHECKED,
            SESSION_OTP_EMAIL_CHALLENGED,
            SESSION_OTP_EMAIL_CHECKED,
            SESSION_WEBAUTHN_CHALLENGED,
            SESSION_WEBAUTHN_CHECKED,
            SESSION_INTENT_CHECKED,
            SESSION_TOKEN_SET,
            SESSION_METADATA_SET,
            SESSION_TERMINATED,
        ] {
            registry.register(tag, |e| Ok(AnyEvent::Session(SessionEvent::decode(e)?)));
        }
    }
}
