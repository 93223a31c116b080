//! Check and challenge inputs of the session commands, and their replies.

use std::collections::HashMap;

use serde_json::Value;

use crate::providers::UserVerification;

/// Proof of the user factor: which user the session is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckUser {
    /// The user to bind the session to.
    pub user_id: String,
}

/// Proof of the password factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPassword {
    /// The cleartext password, verified through the password port.
    pub password: String,
}

/// Proof of a code factor (TOTP, OTP-SMS, OTP-Email).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCode {
    /// The one-time code.
    pub code: String,
}

/// Proof of the WebAuthn factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckWebAuthn {
    /// The client's assertion response, verified through the WebAuthn port
    /// against the pending challenge.
    pub assertion: Value,
}

/// Proof of the intent factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIntent {
    /// The intent aggregate to consume.
    pub intent_id: String,
    /// The token returned when the intent succeeded.
    pub intent_token: String,
}

/// Factor proofs supplied with one command.
///
/// Within one command, checks are consumed in a fixed order: User →
/// Password → TOTP → OTP-SMS → OTP-Email → WebAuthn → Intent. A failing
/// check aborts the command before any event is pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checks {
    /// User factor.
    pub user: Option<CheckUser>,
    /// Password factor.
    pub password: Option<CheckPassword>,
    /// TOTP factor.
    pub totp: Option<CheckCode>,
    /// OTP-SMS factor.
    pub otp_sms: Option<CheckCode>,
    /// OTP-Email factor.
    pub otp_email: Option<CheckCode>,
    /// WebAuthn factor.
    pub webauthn: Option<CheckWebAuthn>,
    /// Intent factor.
    pub intent: Option<CheckIntent>,
}

impl Checks {
    /// Just a user check, the most common first step.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user: Some(CheckUser {
                user_id: user_id.into(),
            }),
            ..Self::default()
        }
    }
}

/// A WebAuthn challenge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestWebAuthn {
    /// Relying-party domain.
    pub domain: String,
    /// Authenticator user-verification requirement.
    pub user_verification: UserVerification,
}

/// An OTP challenge request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOtp {
    /// Return the generated code to the caller instead of dispatching a
    /// notification. Used by transports that deliver codes themselves.
    pub return_code: bool,
}

/// Challenge requests supplied with one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Challenges {
    /// Open a WebAuthn challenge.
    pub webauthn: Option<RequestWebAuthn>,
    /// Open an OTP-SMS challenge.
    pub otp_sms: Option<RequestOtp>,
    /// Open an OTP-Email challenge.
    pub otp_email: Option<RequestOtp>,
}

/// Public halves of the challenges opened by a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeReplies {
    /// WebAuthn credential-request options for the client.
    pub webauthn: Option<Value>,
    /// OTP-SMS code, only when requested with `return_code`.
    pub otp_sms: Option<String>,
    /// OTP-Email code, only when requested with `return_code`.
    pub otp_email: Option<String>,
}

/// Session metadata map.
pub type Metadata = HashMap<String, String>;
