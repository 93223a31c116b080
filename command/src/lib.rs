//! Command engine and session state machine for the Garrison identity
//! platform.
//!
//! Every mutation follows the same shape: build the write models needed for
//! validation, load them from the event store, validate, push the resulting
//! events (with their unique-constraint operations) atomically, and reduce
//! the pushed events back into the model for the returned object details.
//!
//! Sequence conflicts are recovered here (reload and re-validate, a small
//! bounded number of times) and never surface to callers unless retries
//! exhaust. `AlreadyExists` and validation errors surface immediately.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod intent;
pub mod intent_model;
pub mod org;
pub mod org_model;
pub mod providers;
pub mod session;
pub mod session_checks;
pub mod session_model;
pub mod user_model;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use garrison_core::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
use garrison_core::event_store::EventStore;
use garrison_core::{Error, Result};

use providers::{PasswordVerifier, TotpVerifier, Unconfigured, WebAuthnVerifier};

pub use org::OrgCreated;
pub use session::{
    CreateSessionRequest, DeleteSessionRequest, SessionCreated, SessionUpdated, SessionView,
    SetSessionRequest,
};
pub use session_checks::{Challenges, Checks, Metadata};

/// Write metadata returned by every command: the freshly assigned sequence,
/// the change time, and the owning org.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDetails {
    /// Per-aggregate sequence after the command.
    pub sequence: u64,
    /// Creation time of the last event.
    pub change_date: Option<DateTime<Utc>>,
    /// Org owning the aggregate.
    pub resource_owner: String,
}

/// Command engine tuning.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Session/token lifetime granted on every token rotation.
    pub session_lifetime: Duration,
    /// OTP challenge lifetime.
    pub otp_lifetime: Duration,
    /// Conflict retries before giving up.
    pub conflict_retries: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            session_lifetime: Duration::hours(24),
            otp_lifetime: Duration::minutes(5),
            conflict_retries: 3,
        }
    }
}

/// The command engine. One instance per process, shared across requests.
pub struct Commands {
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) webauthn: Arc<dyn WebAuthnVerifier>,
    pub(crate) passwords: Arc<dyn PasswordVerifier>,
    pub(crate) totp: Arc<dyn TotpVerifier>,
    pub(crate) config: CommandConfig,
}

impl Commands {
    /// Start building a command engine over a store.
    #[must_use]
    pub fn builder(store: Arc<dyn EventStore>) -> CommandsBuilder {
        CommandsBuilder {
            store,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            webauthn: Arc::new(Unconfigured),
            passwords: Arc::new(Unconfigured),
            totp: Arc::new(Unconfigured),
            config: CommandConfig::default(),
        }
    }

    /// Decide whether a failed push warrants a reload-and-retry. Returns
    /// `Ok(())` to retry; any non-conflict error, and conflict exhaustion,
    /// bail.
    pub(crate) fn retry_or_bail(&self, attempt: &mut u32, err: Error) -> Result<()> {
        if !err.is_conflict() {
            return Err(err);
        }
        *attempt += 1;
        if *attempt > self.config.conflict_retries {
            tracing::warn!(attempts = *attempt, "push conflict retries exhausted");
            return Err(Error::failed_precondition(
                "COMMAND-conflict-exhausted",
                "aggregate kept changing concurrently",
            ));
        }
        tracing::debug!(attempt = *attempt, "push conflicted, reloading write models");
        Ok(())
    }
}

/// Builder wiring the engine's collaborators; every seam has a default so
/// tests only override what they exercise.
pub struct CommandsBuilder {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    webauthn: Arc<dyn WebAuthnVerifier>,
    passwords: Arc<dyn PasswordVerifier>,
    totp: Arc<dyn TotpVerifier>,
    config: CommandConfig,
}

impl CommandsBuilder {
    /// Override the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the id generator.
    #[must_use]
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Wire the WebAuthn verifier.
    #[must_use]
    pub fn webauthn(mut self, webauthn: Arc<dyn WebAuthnVerifier>) -> Self {
        self.webauthn = webauthn;
        self
    }

    /// Wire the password verifier.
    #[must_use]
    pub fn passwords(mut self, passwords: Arc<dyn PasswordVerifier>) -> Self {
        self.passwords = passwords;
        self
    }

    /// Wire the TOTP verifier.
    #[must_use]
    pub fn totp(mut self, totp: Arc<dyn TotpVerifier>) -> Self {
        self.totp = totp;
        self
    }

    /// Override the tuning.
    #[must_use]
    pub fn config(mut self, config: CommandConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> Commands {
        Commands {
            store: self.store,
            clock: self.clock,
            ids: self.ids,
            webauthn: self.webauthn,
            passwords: self.passwords,
            totp: self.totp,
            config: self.config,
        }
    }
}
