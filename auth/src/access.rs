//! API access checks for session-token bearers.
//!
//! A session token grants access to its own session only. Every
//! authorization failure (unknown session, wrong token, expired token,
//! terminated session) answers with the same opaque `Unauthenticated`, so
//! a probing caller learns nothing about why. Only a policy-driven MFA
//! rejection is distinguishable, as `PermissionDenied`.

use std::sync::Arc;

use garrison_command::session_model::{SessionState, SessionWriteModel};
use garrison_core::environment::Clock;
use garrison_core::event_store::EventStore;
use garrison_core::write_model::load;
use garrison_core::{Error, Result};

/// Caller policy applied after authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy {
    /// Demand a verified second factor on the session.
    pub require_mfa: bool,
}

/// The authenticated context handed to request handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    /// The authenticated session.
    pub session_id: String,
    /// The session's user, when a user factor verified.
    pub user_id: Option<String>,
    /// Org of the session's user.
    pub user_resource_owner: Option<String>,
}

fn unauthenticated() -> Error {
    Error::unauthenticated("AUTH-session-token", "invalid session token")
}

/// Authenticates bearer session tokens against the event-sourced session
/// state.
pub struct SessionAuthorizer {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl SessionAuthorizer {
    /// Authorizer over the given store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Authenticate a bearer session token for `session_id` and apply
    /// `policy`.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for every authentication failure,
    /// `PermissionDenied` with code `AUTH-mfa-required` when the policy
    /// demands MFA and the session has no verified second factor.
    pub async fn authenticate(
        &self,
        instance_id: &str,
        session_id: &str,
        session_token: &str,
        policy: AccessPolicy,
    ) -> Result<AccessContext> {
        let mut model = SessionWriteModel::new(instance_id, session_id);
        load(self.store.as_ref(), &mut model).await?;
        if !model.exists() {
            return Err(unauthenticated());
        }
        if model
            .verify_token(session_token, self.clock.now())
            .is_err()
        {
            return Err(unauthenticated());
        }
        if model.state == SessionState::Terminated {
            return Err(unauthenticated());
        }
        if policy.require_mfa && !model.has_second_factor() {
            return Err(Error::permission_denied(
                "AUTH-mfa-required",
                "a second factor is required",
            ));
        }

        Ok(AccessContext {
            session_id: session_id.to_owned(),
            user_id: model.user_id.clone(),
            user_resource_owner: model.user_resource_owner.clone(),
        })
    }
}
