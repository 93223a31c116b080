//! IdP intent commands.
//!
//! The provider handshake itself (OIDC/OAuth redirects, token exchange) is
//! an external collaborator; these commands record its outcome so the
//! session intent check can consume it.

use garrison_core::aggregate::{Aggregate, AggregateType};
use garrison_core::command::Command;
use garrison_core::write_model::load;
use garrison_core::{Error, Result};
use garrison_domain::idp_intent::{
    IntentFailed, IntentLinked, IntentStarted, IntentSucceeded, INTENT_FAILED, INTENT_LINKED,
    INTENT_STARTED, INTENT_SUCCEEDED,
};

use crate::crypto;
use crate::intent_model::{IntentState, IntentWriteModel};
use crate::Commands;

impl Commands {
    /// Record the start of an IdP handshake. Returns the new intent id.
    ///
    /// # Errors
    ///
    /// Propagates push errors.
    pub async fn start_idp_intent(
        &self,
        instance_id: &str,
        resource_owner: &str,
        idp_id: &str,
        creator: &str,
    ) -> Result<String> {
        let intent_id = self.ids.next_id();
        let aggregate = Aggregate::new(
            instance_id,
            AggregateType::IdpIntent,
            &intent_id,
            resource_owner,
        );
        let command = Command::new(aggregate, INTENT_STARTED, creator).with_payload(
            &IntentStarted {
                idp_id: idp_id.to_owned(),
            },
        )?;
        self.store.push(vec![command]).await?;
        Ok(intent_id)
    }

    /// Record a successful handshake. `user_id` may be empty when the
    /// external identity is not linked to a platform user yet. Returns the
    /// intent token the client hands to the session intent check.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown intent, `FailedPrecondition` when the
    /// intent is not in the started state.
    pub async fn succeed_idp_intent(
        &self,
        instance_id: &str,
        intent_id: &str,
        idp_user_id: &str,
        user_id: Option<&str>,
        creator: &str,
    ) -> Result<String> {
        let mut model = IntentWriteModel::new(instance_id, intent_id);
        load(self.store.as_ref(), &mut model).await?;
        if model.state == IntentState::Unspecified {
            return Err(Error::not_found("INTENT-not-found", "intent does not exist"));
        }
        if model.state != IntentState::Started {
            return Err(Error::failed_precondition(
                "INTENT-not-started",
                "intent already concluded",
            ));
        }

        let intent_token = crypto::generate_secret();
        let aggregate = Aggregate::new(
            instance_id,
            AggregateType::IdpIntent,
            intent_id,
            &model.model.resource_owner,
        );
        let command = Command::new(aggregate, INTENT_SUCCEEDED, creator).with_payload(
            &IntentSucceeded {
                idp_user_id: idp_user_id.to_owned(),
                user_id: user_id.unwrap_or_default().to_owned(),
                token_hash: crypto::hash_secret(&intent_token),
            },
        )?;
        self.store.push(vec![command]).await?;
        Ok(intent_token)
    }

    /// Record a failed handshake.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown intent, `FailedPrecondition` when the
    /// intent is not in the started state.
    pub async fn fail_idp_intent(
        &self,
        instance_id: &str,
        intent_id: &str,
        reason: &str,
        creator: &str,
    ) -> Result<()> {
        let mut model = IntentWriteModel::new(instance_id, intent_id);
        load(self.store.as_ref(), &mut model).await?;
        if model.state == IntentState::Unspecified {
            return Err(Error::not_found("INTENT-not-found", "intent does not exist"));
        }
        if model.state != IntentState::Started {
            return Err(Error::failed_precondition(
                "INTENT-not-started",
                "intent already concluded",
            ));
        }

        let aggregate = Aggregate::new(
            instance_id,
            AggregateType::IdpIntent,
            intent_id,
            &model.model.resource_owner,
        );
        let command = Command::new(aggregate, INTENT_FAILED, creator).with_payload(&IntentFailed {
            reason: reason.to_owned(),
        })?;
        self.store.push(vec![command]).await?;
        Ok(())
    }

    /// Link a platform user to a succeeded intent after the fact, enabling
    /// a retried session intent check.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown intent, `FailedPrecondition` when the
    /// intent has not succeeded or already carries a user.
    pub async fn link_idp_intent_user(
        &self,
        instance_id: &str,
        intent_id: &str,
        user_id: &str,
        creator: &str,
    ) -> Result<()> {
        let mut model = IntentWriteModel::new(instance_id, intent_id);
        load(self.store.as_ref(), &mut model).await?;
        if model.state == IntentState::Unspecified {
            return Err(Error::not_found("INTENT-not-found", "intent does not exist"));
        }
        if model.state != IntentState::Succeeded {
            return Err(Error::failed_precondition(
                "INTENT-not-succeeded",
                "intent has not succeeded",
            ));
        }
        if !model.user_id.is_empty() {
            return Err(Error::failed_precondition(
                "INTENT-already-linked",
                "intent already carries a user",
            ));
        }

        let aggregate = Aggregate::new(
            instance_id,
            AggregateType::IdpIntent,
            intent_id,
            &model.model.resource_owner,
        );
        let command = Command::new(aggregate, INTENT_LINKED, creator).with_payload(&IntentLinked {
            user_id: user_id.to_owned(),
        })?;
        self.store.push(vec![command]).await?;
        Ok(())
    }
}
