//! User write models used by session checks.

use garrison_core::aggregate::AggregateType;
use garrison_core::query::{AggregateFilter, SearchQuery};
use garrison_core::write_model::{QueryReducer, WriteModel};
use garrison_core::{Result, StoredEvent};
use garrison_domain::user::{self, UserEvent};
use garrison_domain::{AnyEvent, decode};

/// Lifecycle state of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserState {
    /// No events seen.
    #[default]
    Unspecified,
    /// Usable for authentication.
    Active,
    /// Locked by an administrator.
    Locked,
    /// Deactivated.
    Deactivated,
    /// Removed; terminal.
    Removed,
}

/// Minimal user view for the session user check.
#[derive(Debug, Clone, Default)]
pub struct UserWriteModel {
    /// Shared write-model bookkeeping.
    pub model: WriteModel,
    /// Lifecycle state.
    pub state: UserState,
}

impl UserWriteModel {
    /// Model for one user.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            model: WriteModel::new(instance_id, user_id, ""),
            state: UserState::Unspecified,
        }
    }

    /// Whether the user can authenticate.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, UserState::Active)
    }
}

impl QueryReducer for UserWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(self.model.instance_id.clone())
            .add_filter(
                AggregateFilter::aggregate_type(AggregateType::User)
                    .aggregate_ids([self.model.aggregate_id.clone()])
                    .event_types([
                        user::USER_HUMAN_ADDED,
                        user::USER_LOCKED,
                        user::USER_DEACTIVATED,
                        user::USER_REMOVED,
                    ]),
            )
            .build()
    }

    fn reduce(&mut self, event: &StoredEvent) -> Result<()> {
        if let AnyEvent::User(user_event) = decode(event)? {
            match user_event {
                UserEvent::HumanAdded(_) => self.state = UserState::Active,
                UserEvent::Locked => self.state = UserState::Locked,
                UserEvent::Deactivated => self.state = UserState::Deactivated,
                UserEvent::Removed => self.state = UserState::Removed,
                _ => {}
            }
        }
        self.model.append(event);
        Ok(())
    }
}

/// Readiness of a user's TOTP enrolment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TotpState {
    /// Never enrolled.
    #[default]
    Unspecified,
    /// Secret enrolled, verification pending.
    NotReady,
    /// Verified and usable.
    Ready,
    /// Removed.
    Removed,
}

/// TOTP enrolment view backing the session TOTP check.
#[derive(Debug, Clone, Default)]
pub struct TotpWriteModel {
    /// Shared write-model bookkeeping.
    pub model: WriteModel,
    /// Enrolment state.
    pub state: TotpState,
    /// Encrypted secret, present once enrolled.
    pub secret: Option<String>,
}

impl TotpWriteModel {
    /// Model for one user's TOTP enrolment.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            model: WriteModel::new(instance_id, user_id, ""),
            state: TotpState::Unspecified,
            secret: None,
        }
    }
}

impl QueryReducer for TotpWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(self.model.instance_id.clone())
            .add_filter(
                AggregateFilter::aggregate_type(AggregateType::User)
                    .aggregate_ids([self.model.aggregate_id.clone()])
                    .event_types([
                        user::USER_TOTP_ADDED,
                        user::USER_TOTP_VERIFIED,
                        user::USER_TOTP_REMOVED,
                        user::USER_REMOVED,
                    ]),
            )
            .build()
    }

    fn reduce(&mut self, event: &StoredEvent) -> Result<()> {
        if let AnyEvent::User(user_event) = decode(event)? {
            match user_event {
                UserEvent::TotpAdded(added) => {
                    self.secret = Some(added.secret);
                    self.state = TotpState::NotReady;
                }
                UserEvent::TotpVerified => self.state = TotpState::Ready,
                UserEvent::TotpRemoved | UserEvent::Removed => {
                    self.secret = None;
                    self.state = TotpState::Removed;
                }
                _ => {}
            }
        }
        self.model.append(event);
        Ok(())
    }
}
