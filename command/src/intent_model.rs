//! IdP intent write model.

use garrison_core::aggregate::AggregateType;
use garrison_core::query::{AggregateFilter, SearchQuery};
use garrison_core::write_model::{QueryReducer, WriteModel};
use garrison_core::{Result, StoredEvent};
use garrison_domain::idp_intent::IntentEvent;
use garrison_domain::{AnyEvent, decode};

/// Progress of an IdP handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntentState {
    /// No events seen.
    #[default]
    Unspecified,
    /// Redirected to the provider, response pending.
    Started,
    /// Provider confirmed the external identity.
    Succeeded,
    /// Provider rejected or the handshake errored.
    Failed,
}

/// Intent view for the intent commands and the session intent check.
#[derive(Debug, Clone, Default)]
pub struct IntentWriteModel {
    /// Shared write-model bookkeeping.
    pub model: WriteModel,
    /// Handshake state.
    pub state: IntentState,
    /// Identity provider in use.
    pub idp_id: String,
    /// External user id, known once succeeded.
    pub idp_user_id: String,
    /// Linked platform user; empty until linked.
    pub user_id: String,
    /// SHA-256 of the intent token.
    pub token_hash: Option<String>,
}

impl IntentWriteModel {
    /// Model for one intent.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, intent_id: impl Into<String>) -> Self {
        Self {
            model: WriteModel::new(instance_id, intent_id, ""),
            ..Self::default()
        }
    }
}

impl QueryReducer for IntentWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(self.model.instance_id.clone())
            .add_filter(
                AggregateFilter::aggregate_type(AggregateType::IdpIntent)
                    .aggregate_ids([self.model.aggregate_id.clone()]),
            )
            .build()
    }

    fn reduce(&mut self, event: &StoredEvent) -> Result<()> {
        if let AnyEvent::Intent(intent_event) = decode(event)? {
            match intent_event {
                IntentEvent::Started(started) => {
                    self.state = IntentState::Started;
                    self.idp_id = started.idp_id;
                }
                IntentEvent::Succeeded(succeeded) => {
                    self.state = IntentState::Succeeded;
                    self.idp_user_id = succeeded.idp_user_id;
                    self.user_id = succeeded.user_id;
                    self.token_hash = Some(succeeded.token_hash);
                }
                IntentEvent::Failed(_) => self.state = IntentState::Failed,
                IntentEvent::Linked(linked) => self.user_id = linked.user_id,
            }
        }
        self.model.append(event);
        Ok(())
    }
}
