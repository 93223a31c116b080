//! Session commands: the authentication ceremony.
//!
//! A session moves through `Empty → WithUser → WithChallenges ⇄ WithFactors
//! → Terminated` and is never reopened. Every successful mutation rotates
//! the session token; only the token's hash is stored. Checks are consumed
//! in a fixed order within one command (User → Password → TOTP → OTP-SMS →
//! OTP-Email → WebAuthn → Intent), and a failing check aborts the command
//! before any event is pushed.

use chrono::{DateTime, Utc};
use serde_json::Value;

use garrison_core::aggregate::{Aggregate, AggregateType};
use garrison_core::command::Command;
use garrison_core::write_model::{load, QueryReducer};
use garrison_core::{Error, EventType, Result, StoredEvent};
use garrison_domain::session::{
    Checked, IntentChecked, MetadataSet, OtpChallenged, SessionAdded, TokenSet, UserChecked,
    WebAuthnChallenged, WebAuthnChecked, SESSION_ADDED, SESSION_INTENT_CHECKED,
    SESSION_METADATA_SET, SESSION_OTP_EMAIL_CHALLENGED, SESSION_OTP_EMAIL_CHECKED,
    SESSION_OTP_SMS_CHALLENGED, SESSION_OTP_SMS_CHECKED, SESSION_PASSWORD_CHECKED,
    SESSION_TERMINATED, SESSION_TOKEN_SET, SESSION_TOTP_CHECKED, SESSION_USER_CHECKED,
    SESSION_WEBAUTHN_CHALLENGED, SESSION_WEBAUTHN_CHECKED,
};

use crate::crypto;
use crate::intent_model::{IntentState, IntentWriteModel};
use crate::providers::UserVerification;
use crate::session_checks::{
    ChallengeReplies, Challenges, CheckCode, CheckIntent, CheckPassword, CheckUser, CheckWebAuthn,
    Checks, Metadata,
};
use crate::session_model::{Factor, SessionState, SessionWriteModel};
use crate::user_model::{TotpState, TotpWriteModel, UserWriteModel};
use crate::{Commands, ObjectDetails};

/// Input of [`Commands::create_session`].
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// Tenant.
    pub instance_id: String,
    /// Org owning the session (the caller's org).
    pub resource_owner: String,
    /// Principal creating the session.
    pub creator: String,
    /// Initial factor proofs.
    pub checks: Checks,
    /// Initial challenge requests.
    pub challenges: Challenges,
    /// Caller metadata.
    pub metadata: Metadata,
    /// User agent fingerprint, when the transport forwards one.
    pub user_agent_id: Option<String>,
}

/// Result of [`Commands::create_session`].
#[derive(Debug, Clone)]
pub struct SessionCreated {
    /// New session id.
    pub session_id: String,
    /// First session token; shown once, stored only as a hash.
    pub session_token: String,
    /// Write metadata of the new aggregate.
    pub details: ObjectDetails,
    /// Public halves of any opened challenges.
    pub challenges: ChallengeReplies,
}

/// Input of [`Commands::set_session`].
#[derive(Debug, Clone, Default)]
pub struct SetSessionRequest {
    /// Tenant.
    pub instance_id: String,
    /// Session to update.
    pub session_id: String,
    /// Current session token.
    pub session_token: String,
    /// Principal driving the update.
    pub creator: String,
    /// Factor proofs.
    pub checks: Checks,
    /// Challenge requests.
    pub challenges: Challenges,
    /// Replacement metadata; `None` leaves it untouched.
    pub metadata: Option<Metadata>,
}

/// Result of [`Commands::set_session`].
#[derive(Debug, Clone)]
pub struct SessionUpdated {
    /// Rotated session token; the previous one is now invalid.
    pub session_token: String,
    /// Write metadata after the update.
    pub details: ObjectDetails,
    /// Public halves of any opened challenges.
    pub challenges: ChallengeReplies,
}

/// One verified factor in the read view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorView {
    /// When the factor verified.
    pub verified_at: DateTime<Utc>,
}

/// Public factor state of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFactors {
    /// The authenticated user, with their org.
    pub user: Option<(String, String, FactorView)>,
    /// Password factor.
    pub password: Option<FactorView>,
    /// TOTP factor.
    pub totp: Option<FactorView>,
    /// OTP-SMS factor.
    pub otp_sms: Option<FactorView>,
    /// OTP-Email factor.
    pub otp_email: Option<FactorView>,
    /// WebAuthn factor and whether the authenticator verified the user.
    pub webauthn: Option<(FactorView, bool)>,
    /// Intent factor.
    pub intent: Option<FactorView>,
}

/// Read view of a session, returned by [`Commands::get_session`].
#[derive(Debug, Clone)]
pub struct SessionView {
    /// Session id.
    pub session_id: String,
    /// Creation time.
    pub creation_date: Option<DateTime<Utc>>,
    /// Last change time and sequence.
    pub details: ObjectDetails,
    /// Caller metadata.
    pub metadata: Metadata,
    /// Verified factors.
    pub factors: SessionFactors,
    /// Public credential-request options of a pending WebAuthn challenge.
    pub webauthn_challenge: Option<Value>,
    /// Session expiry.
    pub expiration: Option<DateTime<Utc>>,
}

/// Input of [`Commands::delete_session`].
#[derive(Debug, Clone, Default)]
pub struct DeleteSessionRequest {
    /// Tenant.
    pub instance_id: String,
    /// Session to terminate.
    pub session_id: String,
    /// Current session token.
    pub session_token: String,
    /// Principal terminating the session.
    pub creator: String,
}

/// Accumulates the events of one session command while keeping the write
/// model in step, so later checks observe the effects of earlier ones.
struct SessionCeremony<'a> {
    commands: &'a Commands,
    model: SessionWriteModel,
    aggregate: Aggregate,
    creator: String,
    now: DateTime<Utc>,
    events: Vec<Command>,
    replies: ChallengeReplies,
}

impl<'a> SessionCeremony<'a> {
    fn new(
        commands: &'a Commands,
        model: SessionWriteModel,
        resource_owner: &str,
        creator: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let aggregate = Aggregate::new(
            model.model.instance_id.clone(),
            AggregateType::Session,
            model.model.aggregate_id.clone(),
            resource_owner,
        );
        Self {
            commands,
            model,
            aggregate,
            creator: creator.to_owned(),
            now,
            events: Vec::new(),
            replies: ChallengeReplies::default(),
        }
    }

    fn emit<P: serde::Serialize>(&mut self, event_type: EventType, payload: &P) -> Result<()> {
        let command = Command::new(self.aggregate.clone(), event_type, &self.creator)
            .with_payload(payload)?;
        self.events.push(command);
        Ok(())
    }

    fn add(&mut self, metadata: Metadata, user_agent_id: Option<String>) -> Result<()> {
        self.emit(
            SESSION_ADDED,
            &SessionAdded {
                metadata: metadata.clone(),
                user_agent_id: user_agent_id.clone(),
            },
        )?;
        self.model.state = SessionState::Active;
        self.model.metadata = metadata;
        self.model.user_agent_id = user_agent_id;
        Ok(())
    }

    async fn apply_checks(&mut self, checks: &Checks) -> Result<()> {
        if let Some(check) = &checks.user {
            self.check_user(check).await?;
        }
        if let Some(check) = &checks.password {
            self.check_password(check).await?;
        }
        if let Some(check) = &checks.totp {
            self.check_totp(check).await?;
        }
        if let Some(check) = &checks.otp_sms {
            self.check_otp_sms(check)?;
        }
        if let Some(check) = &checks.otp_email {
            self.check_otp_email(check)?;
        }
        if let Some(check) = &checks.webauthn {
            self.check_webauthn(check)?;
        }
        if let Some(check) = &checks.intent {
            self.check_intent(check).await?;
        }
        Ok(())
    }

    async fn check_user(&mut self, check: &CheckUser) -> Result<()> {
        if let Some(existing) = &self.model.user_id {
            if existing != &check.user_id {
                return Err(Error::failed_precondition(
                    "SESSION-user-mismatch",
                    "session already belongs to another user",
                ));
            }
        }
        let mut user = UserWriteModel::new(&self.model.model.instance_id, &check.user_id);
        load(self.commands.store.as_ref(), &mut user).await?;
        if user.state == crate::user_model::UserState::Unspecified {
            return Err(Error::not_found("USER-not-found", "user does not exist"));
        }
        if !user.is_active() {
            return Err(Error::failed_precondition(
                "USER-not-active",
                "user cannot authenticate",
            ));
        }
        self.emit(
            SESSION_USER_CHECKED,
            &UserChecked {
                user_id: check.user_id.clone(),
                user_resource_owner: user.model.resource_owner.clone(),
                checked_at: self.now,
            },
        )?;
        self.model.user_id = Some(check.user_id.clone());
        self.model.user_resource_owner = Some(user.model.resource_owner);
        self.model.user_factor = Some(Factor {
            verified_at: self.now,
        });
        Ok(())
    }

    fn require_user(&self) -> Result<&str> {
        self.model.user_id.as_deref().ok_or_else(|| {
            Error::failed_precondition(
                "SESSION-user-not-checked",
                "check requires a user factor on the session",
            )
        })
    }

    async fn check_password(&mut self, check: &CheckPassword) -> Result<()> {
        let user_id = self.require_user()?.to_owned();
        self.commands
            .passwords
            .verify(&self.model.model.instance_id, &user_id, &check.password)
            .await?;
        self.emit(
            SESSION_PASSWORD_CHECKED,
            &Checked {
                checked_at: self.now,
            },
        )?;
        self.model.password_factor = Some(Factor {
            verified_at: self.now,
        });
        Ok(())
    }

    async fn check_totp(&mut self, check: &CheckCode) -> Result<()> {
        let user_id = self.require_user()?.to_owned();
        let mut totp = TotpWriteModel::new(&self.model.model.instance_id, &user_id);
        load(self.commands.store.as_ref(), &mut totp).await?;
        if totp.state != TotpState::Ready {
            return Err(Error::failed_precondition(
                "TOTP-not-ready",
                "user has no verified totp enrolment",
            ));
        }
        let secret = totp.secret.as_deref().ok_or_else(|| {
            Error::internal("TOTP-secret-missing", "ready totp enrolment without secret")
        })?;
        self.commands.totp.verify(secret, &check.code)?;
        self.emit(
            SESSION_TOTP_CHECKED,
            &Checked {
                checked_at: self.now,
            },
        )?;
        self.model.totp_factor = Some(Factor {
            verified_at: self.now,
        });
        Ok(())
    }

    fn verify_otp(challenge: Option<&OtpChallenged>, code: &str, now: DateTime<Utc>) -> Result<()> {
        let challenge = challenge.ok_or_else(|| {
            Error::failed_precondition("SESSION-otp-no-challenge", "no pending otp challenge")
        })?;
        if now >= challenge.expiry {
            return Err(Error::failed_precondition(
                "SESSION-otp-expired",
                "otp challenge expired",
            ));
        }
        if !crypto::verify_secret(code, &challenge.code_hash) {
            return Err(Error::invalid_argument(
                "SESSION-otp-invalid",
                "otp code does not match",
            ));
        }
        Ok(())
    }

    fn check_otp_sms(&mut self, check: &CheckCode) -> Result<()> {
        Self::verify_otp(self.model.otp_sms_challenge.as_ref(), &check.code, self.now)?;
        self.emit(
            SESSION_OTP_SMS_CHECKED,
            &Checked {
                checked_at: self.now,
            },
        )?;
        self.model.otp_sms_factor = Some(Factor {
            verified_at: self.now,
        });
        self.model.otp_sms_challenge = None;
        Ok(())
    }

    fn check_otp_email(&mut self, check: &CheckCode) -> Result<()> {
        Self::verify_otp(
            self.model.otp_email_challenge.as_ref(),
            &check.code,
            self.now,
        )?;
        self.emit(
            SESSION_OTP_EMAIL_CHECKED,
            &Checked {
                checked_at: self.now,
            },
        )?;
        self.model.otp_email_factor = Some(Factor {
            verified_at: self.now,
        });
        self.model.otp_email_challenge = None;
        Ok(())
    }

    fn check_webauthn(&mut self, check: &CheckWebAuthn) -> Result<()> {
        let challenge = self.model.webauthn_challenge.clone().ok_or_else(|| {
            Error::failed_precondition(
                "SESSION-webauthn-no-challenge",
                "no pending webauthn challenge",
            )
        })?;
        let outcome = self
            .commands
            .webauthn
            .verify_assertion(&challenge, &check.assertion)?;
        if challenge.user_verification_required && !outcome.user_verified {
            return Err(Error::failed_precondition(
                "SESSION-webauthn-verification-required",
                "authenticator did not verify the user",
            ));
        }
        self.emit(
            SESSION_WEBAUTHN_CHECKED,
            &WebAuthnChecked {
                checked_at: self.now,
                user_verified: outcome.user_verified,
            },
        )?;
        self.model.webauthn_factor = Some(Factor {
            verified_at: self.now,
        });
        self.model.webauthn_user_verified = outcome.user_verified;
        // Single use: the challenge is consumed whether or not user
        // verification was requested.
        self.model.webauthn_challenge = None;
        Ok(())
    }

    async fn check_intent(&mut self, check: &CheckIntent) -> Result<()> {
        let mut intent = IntentWriteModel::new(&self.model.model.instance_id, &check.intent_id);
        load(self.commands.store.as_ref(), &mut intent).await?;
        if intent.state != IntentState::Succeeded {
            return Err(Error::failed_precondition(
                "INTENT-not-succeeded",
                "intent has not succeeded",
            ));
        }
        let token_ok = intent
            .token_hash
            .as_deref()
            .is_some_and(|hash| crypto::verify_secret(&check.intent_token, hash));
        if !token_ok {
            return Err(Error::invalid_argument(
                "INTENT-token-invalid",
                "intent token does not match",
            ));
        }
        if intent.user_id.is_empty() {
            return Err(Error::failed_precondition(
                "INTENT-user-missing",
                "intent carries no linked user",
            ));
        }
        if let Some(user_id) = &self.model.user_id {
            if user_id != &intent.user_id {
                return Err(Error::failed_precondition(
                    "INTENT-other-user",
                    "intent belongs to another user",
                ));
            }
        }
        self.emit(
            SESSION_INTENT_CHECKED,
            &IntentChecked {
                intent_id: check.intent_id.clone(),
                checked_at: self.now,
            },
        )?;
        self.model.intent_factor = Some(Factor {
            verified_at: self.now,
        });
        Ok(())
    }

    fn request_challenges(&mut self, challenges: &Challenges) -> Result<()> {
        if let Some(request) = &challenges.webauthn {
            let nonce = crypto::generate_secret();
            let options = self.commands.webauthn.request_options(
                &request.domain,
                request.user_verification,
                &nonce,
            )?;
            let payload = WebAuthnChallenged {
                challenge: nonce,
                allowed_domain: request.domain.clone(),
                user_verification_required: request.user_verification
                    == UserVerification::Required,
                credential_request_options: options.clone(),
            };
            self.emit(SESSION_WEBAUTHN_CHALLENGED, &payload)?;
            self.model.webauthn_challenge = Some(payload);
            self.replies.webauthn = Some(options);
        }
        if let Some(request) = &challenges.otp_sms {
            let code = self.open_otp_challenge(SESSION_OTP_SMS_CHALLENGED, request.return_code)?;
            self.replies.otp_sms = code;
        }
        if let Some(request) = &challenges.otp_email {
            let code =
                self.open_otp_challenge(SESSION_OTP_EMAIL_CHALLENGED, request.return_code)?;
            self.replies.otp_email = code;
        }
        Ok(())
    }

    fn open_otp_challenge(
        &mut self,
        event_type: EventType,
        return_code: bool,
    ) -> Result<Option<String>> {
        let code = crypto::generate_otp_code(6);
        let payload = OtpChallenged {
            code_hash: crypto::hash_secret(&code),
            expiry: self.now + self.commands.config.otp_lifetime,
            return_code,
        };
        let is_sms = event_type == SESSION_OTP_SMS_CHALLENGED;
        self.emit(event_type, &payload)?;
        if is_sms {
            self.model.otp_sms_challenge = Some(payload);
        } else {
            self.model.otp_email_challenge = Some(payload);
        }
        if return_code {
            Ok(Some(code))
        } else {
            // Delivery is owned by the notification dispatcher, which picks
            // the challenge up from the event stream.
            tracing::debug!(session = %self.aggregate.id, "otp code handed off for delivery");
            Ok(None)
        }
    }

    fn set_metadata(&mut self, metadata: Metadata) -> Result<()> {
        if metadata == self.model.metadata {
            return Ok(());
        }
        self.emit(
            SESSION_METADATA_SET,
            &MetadataSet {
                metadata: metadata.clone(),
            },
        )?;
        self.model.metadata = metadata;
        Ok(())
    }

    /// Mint and record a fresh token; invalidates any prior token.
    fn set_token(&mut self) -> Result<String> {
        let token = crypto::generate_secret();
        let expiration = self.now + self.commands.config.session_lifetime;
        self.emit(
            SESSION_TOKEN_SET,
            &TokenSet {
                token_hash: crypto::hash_secret(&token),
                expiration,
            },
        )?;
        self.model.token_hash = Some(crypto::hash_secret(&token));
        self.model.expiration = Some(expiration);
        Ok(token)
    }

    fn terminate(&mut self) -> Result<()> {
        self.emit(SESSION_TERMINATED, &serde_json::json!({}))?;
        self.model.state = SessionState::Terminated;
        Ok(())
    }

    fn into_events(self) -> (Vec<Command>, ChallengeReplies) {
        (self.events, self.replies)
    }
}

fn details_after(model: &SessionWriteModel, pushed: &[StoredEvent]) -> Result<ObjectDetails> {
    let mut updated = model.clone();
    for event in pushed {
        updated.reduce(event)?;
    }
    Ok(ObjectDetails {
        sequence: updated.model.processed_sequence,
        change_date: updated.model.change_date,
        resource_owner: updated.model.resource_owner,
    })
}

impl Commands {
    /// Create a session, apply any initial checks and challenges, and mint
    /// the first token.
    ///
    /// # Errors
    ///
    /// Check failures abort before any event is pushed: `NotFound` for an
    /// unknown user, `FailedPrecondition` for ordering violations (e.g.
    /// password without user), `Unauthenticated`/`InvalidArgument` for
    /// failed proofs.
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<SessionCreated> {
        let session_id = self.ids.next_id();
        let now = self.clock.now();

        let model = SessionWriteModel::new(&request.instance_id, &session_id);
        let mut ceremony = SessionCeremony::new(
            self,
            model,
            &request.resource_owner,
            &request.creator,
            now,
        );
        ceremony.add(request.metadata, request.user_agent_id)?;
        ceremony.apply_checks(&request.checks).await?;
        ceremony.request_challenges(&request.challenges)?;
        let session_token = ceremony.set_token()?;

        let fresh = SessionWriteModel::new(&request.instance_id, &session_id);
        let (events, challenges) = ceremony.into_events();
        let pushed = self.store.push(events).await?;
        let details = details_after(&fresh, &pushed)?;

        tracing::info!(session = %session_id, "session created");
        Ok(SessionCreated {
            session_id,
            session_token,
            details,
            challenges,
        })
    }

    /// Append checks and challenges to an existing session, rotating its
    /// token.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `Unauthenticated` for a wrong or
    /// expired token, `FailedPrecondition` for a terminated session or a
    /// failing ordered check, and the push errors of the event store after
    /// bounded conflict retries.
    pub async fn set_session(&self, request: SetSessionRequest) -> Result<SessionUpdated> {
        let mut attempt = 0;
        loop {
            let now = self.clock.now();
            let mut model = SessionWriteModel::new(&request.instance_id, &request.session_id);
            load(self.store.as_ref(), &mut model).await?;
            if !model.exists() {
                return Err(Error::not_found("SESSION-not-found", "session does not exist"));
            }
            model.verify_token(&request.session_token, now)?;
            model.ensure_active()?;

            let resource_owner = model.model.resource_owner.clone();
            let loaded = model.clone();
            let mut ceremony =
                SessionCeremony::new(self, model, &resource_owner, &request.creator, now);
            if let Some(metadata) = &request.metadata {
                ceremony.set_metadata(metadata.clone())?;
            }
            ceremony.apply_checks(&request.checks).await?;
            ceremony.request_challenges(&request.challenges)?;
            let session_token = ceremony.set_token()?;

            let (events, challenges) = ceremony.into_events();
            match self.store.push(events).await {
                Ok(pushed) => {
                    let details = details_after(&loaded, &pushed)?;
                    return Ok(SessionUpdated {
                        session_token,
                        details,
                        challenges,
                    });
                }
                Err(err) => self.retry_or_bail(&mut attempt, err)?,
            }
        }
    }

    /// Read a session. Requires a valid token; a terminated session answers
    /// with the same opaque `Unauthenticated` as a wrong token.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `Unauthenticated` otherwise on
    /// any authorization failure.
    pub async fn get_session(
        &self,
        instance_id: &str,
        session_id: &str,
        session_token: &str,
    ) -> Result<SessionView> {
        let now = self.clock.now();
        let mut model = SessionWriteModel::new(instance_id, session_id);
        load(self.store.as_ref(), &mut model).await?;
        if !model.exists() {
            return Err(Error::not_found("SESSION-not-found", "session does not exist"));
        }
        model.verify_token(session_token, now)?;
        if model.state == SessionState::Terminated {
            return Err(Error::unauthenticated(
                "SESSION-token-invalid",
                "invalid session token",
            ));
        }

        let factor = |f: Option<Factor>| {
            f.map(|f| FactorView {
                verified_at: f.verified_at,
            })
        };
        let factors = SessionFactors {
            user: match (&model.user_id, &model.user_resource_owner, model.user_factor) {
                (Some(user_id), Some(owner), Some(f)) => Some((
                    user_id.clone(),
                    owner.clone(),
                    FactorView {
                        verified_at: f.verified_at,
                    },
                )),
                _ => None,
            },
            password: factor(model.password_factor),
            totp: factor(model.totp_factor),
            otp_sms: factor(model.otp_sms_factor),
            otp_email: factor(model.otp_email_factor),
            webauthn: factor(model.webauthn_factor)
                .map(|f| (f, model.webauthn_user_verified)),
            intent: factor(model.intent_factor),
        };

        Ok(SessionView {
            session_id: session_id.to_owned(),
            creation_date: model.creation_date,
            details: ObjectDetails {
                sequence: model.model.processed_sequence,
                change_date: model.model.change_date,
                resource_owner: model.model.resource_owner.clone(),
            },
            metadata: model.metadata.clone(),
            factors,
            webauthn_challenge: model
                .webauthn_challenge
                .as_ref()
                .map(|c| c.credential_request_options.clone()),
            expiration: model.expiration,
        })
    }

    /// Terminate a session. Subsequent access fails; the aggregate accepts
    /// no further events.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `Unauthenticated` for a wrong or
    /// expired token, `FailedPrecondition` when already terminated.
    pub async fn delete_session(&self, request: DeleteSessionRequest) -> Result<ObjectDetails> {
        let mut attempt = 0;
        loop {
            let now = self.clock.now();
            let mut model = SessionWriteModel::new(&request.instance_id, &request.session_id);
            load(self.store.as_ref(), &mut model).await?;
            if !model.exists() {
                return Err(Error::not_found("SESSION-not-found", "session does not exist"));
            }
            model.verify_token(&request.session_token, now)?;
            model.ensure_active()?;

            let resource_owner = model.model.resource_owner.clone();
            let loaded = model.clone();
            let mut ceremony =
                SessionCeremony::new(self, model, &resource_owner, &request.creator, now);
            ceremony.terminate()?;

            let (events, _) = ceremony.into_events();
            match self.store.push(events).await {
                Ok(pushed) => {
                    tracing::info!(session = %request.session_id, "session terminated");
                    return details_after(&loaded, &pushed);
                }
                Err(err) => self.retry_or_bail(&mut attempt, err)?,
            }
        }
    }
}
