//! Session write model.
//!
//! Reconstructed for every session command: carries the verified factors,
//! pending challenges, the token hash, expiry, and lifecycle state needed
//! to validate the next command. Challenges are single-use: the matching
//! `*.checked` event clears them during reduction, so a replayed model
//! refuses a second consumption.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use garrison_core::aggregate::AggregateType;
use garrison_core::query::{AggregateFilter, SearchQuery};
use garrison_core::write_model::{QueryReducer, WriteModel};
use garrison_core::{Error, Result, StoredEvent};
use garrison_domain::session::{OtpChallenged, SessionEvent, WebAuthnChallenged};
use garrison_domain::{decode, AnyEvent};

use crate::crypto;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No events seen.
    #[default]
    Unspecified,
    /// Live ceremony.
    Active,
    /// Terminated; terminal.
    Terminated,
}

/// One verified factor with its verification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Factor {
    /// When the factor verified.
    pub verified_at: DateTime<Utc>,
}

/// Session write model.
#[derive(Debug, Clone, Default)]
pub struct SessionWriteModel {
    /// Shared write-model bookkeeping.
    pub model: WriteModel,
    /// Lifecycle state.
    pub state: SessionState,
    /// When the session was created.
    pub creation_date: Option<DateTime<Utc>>,
    /// Caller metadata.
    pub metadata: HashMap<String, String>,
    /// User agent recorded at creation.
    pub user_agent_id: Option<String>,

    /// User factor: the authenticated user.
    pub user_id: Option<String>,
    /// Org of the authenticated user.
    pub user_resource_owner: Option<String>,
    /// User factor verification time.
    pub user_factor: Option<Factor>,
    /// Password factor.
    pub password_factor: Option<Factor>,
    /// TOTP factor.
    pub totp_factor: Option<Factor>,
    /// OTP-SMS factor.
    pub otp_sms_factor: Option<Factor>,
    /// OTP-Email factor.
    pub otp_email_factor: Option<Factor>,
    /// WebAuthn factor.
    pub webauthn_factor: Option<Factor>,
    /// Whether the WebAuthn authenticator verified the user.
    pub webauthn_user_verified: bool,
    /// Intent factor.
    pub intent_factor: Option<Factor>,

    /// Pending WebAuthn challenge, single-use.
    pub webauthn_challenge: Option<WebAuthnChallenged>,
    /// Pending OTP-SMS challenge, single-use.
    pub otp_sms_challenge: Option<OtpChallenged>,
    /// Pending OTP-Email challenge, single-use.
    pub otp_email_challenge: Option<OtpChallenged>,

    /// SHA-256 of the current token.
    pub token_hash: Option<String>,
    /// Token and session expiry.
    pub expiration: Option<DateTime<Utc>>,
}

impl SessionWriteModel {
    /// Model for one session.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            model: WriteModel::new(instance_id, session_id, ""),
            ..Self::default()
        }
    }

    /// Whether any event was seen.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !matches!(self.state, SessionState::Unspecified)
    }

    /// Authenticate a caller-supplied token against the stored hash.
    ///
    /// All failures are the same opaque `Unauthenticated`, so a probing
    /// caller cannot distinguish a wrong token from an expired one.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` with code `SESSION-token-invalid`.
    pub fn verify_token(&self, token: &str, now: DateTime<Utc>) -> Result<()> {
        let valid = match &self.token_hash {
            Some(hash) => crypto::verify_secret(token, hash),
            None => false,
        };
        let expired = self.expiration.is_some_and(|expiration| now >= expiration);
        if !valid || expired {
            return Err(Error::unauthenticated(
                "SESSION-token-invalid",
                "invalid session token",
            ));
        }
        Ok(())
    }

    /// Guard for appending events: a terminated session accepts none.
    ///
    /// # Errors
    ///
    /// `NotFound` when the session never existed, `FailedPrecondition` with
    /// code `SESSION-terminated` when it did and was terminated.
    pub fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Unspecified => Err(Error::not_found(
                "SESSION-not-found",
                "session does not exist",
            )),
            SessionState::Terminated => Err(Error::failed_precondition(
                "SESSION-terminated",
                "session is terminated",
            )),
            SessionState::Active => Ok(()),
        }
    }

    /// Whether a second factor (MFA) verified on this session.
    #[must_use]
    pub const fn has_second_factor(&self) -> bool {
        self.totp_factor.is_some()
            || self.otp_sms_factor.is_some()
            || self.otp_email_factor.is_some()
            || self.webauthn_factor.is_some()
    }
}

impl QueryReducer for SessionWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(self.model.instance_id.clone())
            .add_filter(
                AggregateFilter::aggregate_type(AggregateType::Session)
                    .aggregate_ids([self.model.aggregate_id.clone()]),
            )
            .build()
    }

    fn reduce(&mut self, event: &StoredEvent) -> Result<()> {
        if let AnyEvent::Session(session_event) = decode(event)? {
            match session_event {
                SessionEvent::Added(added) => {
                    self.state = SessionState::Active;
                    self.creation_date = Some(event.created_at);
                    self.metadata = added.metadata;
                    self.user_agent_id = added.user_agent_id;
                }
                SessionEvent::UserChecked(checked) => {
                    self.user_id = Some(checked.user_id);
                    self.user_resource_owner = Some(checked.user_resource_owner);
                    self.user_factor = Some(Factor {
                        verified_at: checked.checked_at,
                    });
                }
                SessionEvent::PasswordChecked(checked) => {
                    self.password_factor = Some(Factor {
                        verified_at: checked.checked_at,
                    });
                }
                SessionEvent::TotpChecked(checked) => {
                    self.totp_factor = Some(Factor {
                        verified_at: checked.checked_at,
                    });
                }
                SessionEvent::OtpSmsChallenged(challenge) => {
                    self.otp_sms_challenge = Some(challenge);
                }
                SessionEvent::OtpSmsChecked(checked) => {
                    self.otp_sms_factor = Some(Factor {
                        verified_at: checked.checked_at,
                    });
                    self.otp_sms_challenge = None;
                }
                SessionEvent::OtpEmailChallenged(challenge) => {
                    self.otp_email_challenge = Some(challenge);
                }
                SessionEvent::OtpEmailChecked(checked) => {
                    self.otp_email_factor = Some(Factor {
                        verified_at: checked.checked_at,
                    });
                    self.otp_email_challenge = None;
                }
                SessionEvent::WebAuthnChallenged(challenge) => {
                    self.webauthn_challenge = Some(challenge);
                }
                SessionEvent::WebAuthnChecked(checked) => {
                    self.webauthn_factor = Some(Factor {
                        verified_at: checked.checked_at,
                    });
                    self.webauthn_user_verified = checked.user_verified;
                    self.webauthn_challenge = None;
                }
                SessionEvent::IntentChecked(checked) => {
                    self.intent_factor = Some(Factor {
                        verified_at: checked.checked_at,
                    });
                }
                SessionEvent::TokenSet(set) => {
                    self.token_hash = Some(set.token_hash);
                    self.expiration = Some(set.expiration);
                }
                SessionEvent::MetadataSet(set) => {
                    self.metadata = set.metadata;
                }
                SessionEvent::Terminated => {
                    self.state = SessionState::Terminated;
                }
            }
        }
        self.model.append(event);
        Ok(())
    }
}
