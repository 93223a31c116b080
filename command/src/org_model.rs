//! Org write model.

use garrison_core::aggregate::AggregateType;
use garrison_core::query::{AggregateFilter, SearchQuery};
use garrison_core::write_model::{QueryReducer, WriteModel};
use garrison_core::{Result, StoredEvent};
use garrison_domain::org::{self, OrgEvent};
use garrison_domain::{AnyEvent, decode};

/// Lifecycle state of an org.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrgState {
    /// No events seen.
    #[default]
    Unspecified,
    /// Live.
    Active,
    /// Removed; terminal.
    Removed,
}

/// Org view for the org commands.
#[derive(Debug, Clone, Default)]
pub struct OrgWriteModel {
    /// Shared write-model bookkeeping.
    pub model: WriteModel,
    /// Lifecycle state.
    pub state: OrgState,
    /// Current display name.
    pub name: String,
}

impl OrgWriteModel {
    /// Model for one org.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        let org_id = org_id.into();
        Self {
            model: WriteModel::new(instance_id, org_id.clone(), org_id),
            state: OrgState::Unspecified,
            name: String::new(),
        }
    }
}

impl QueryReducer for OrgWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(self.model.instance_id.clone())
            .add_filter(
                AggregateFilter::aggregate_type(AggregateType::Org)
                    .aggregate_ids([self.model.aggregate_id.clone()])
                    .event_types([org::ORG_ADDED, org::ORG_CHANGED, org::ORG_REMOVED]),
            )
            .build()
    }

    fn reduce(&mut self, event: &StoredEvent) -> Result<()> {
        if let AnyEvent::Org(org_event) = decode(event)? {
            match org_event {
                OrgEvent::Added(named) => {
                    self.state = OrgState::Active;
                    self.name = named.name;
                }
                OrgEvent::Changed(named) => self.name = named.name,
                OrgEvent::Removed => self.state = OrgState::Removed,
            }
        }
        self.model.append(event);
        Ok(())
    }
}
