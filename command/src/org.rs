//! Org commands.
//!
//! Org names are unique per instance through a unique constraint whose life
//! follows the org: claimed on add, swapped on rename, released on remove.

use garrison_core::aggregate::{Aggregate, AggregateType};
use garrison_core::command::{Command, UniqueConstraint};
use garrison_core::write_model::{load, QueryReducer};
use garrison_core::{Error, Result, StoredEvent};
use garrison_domain::org::{OrgNamed, ORG_ADDED, ORG_CHANGED, ORG_REMOVED, UNIQUE_ORG_NAME};
use garrison_domain::validation::normalize_org_name;

use crate::org_model::{OrgState, OrgWriteModel};
use crate::{Commands, ObjectDetails};

/// Result of [`Commands::add_org`].
#[derive(Debug, Clone)]
pub struct OrgCreated {
    /// New org id.
    pub org_id: String,
    /// Write metadata of the new aggregate.
    pub details: ObjectDetails,
}

fn details_after(model: &OrgWriteModel, pushed: &[StoredEvent]) -> Result<ObjectDetails> {
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

fn loaded_org(model: &OrgWriteModel) -> Result<()> {
    match model.state {
        OrgState::Unspecified | OrgState::Removed => {
            Err(Error::not_found("ORG-not-found", "org does not exist"))
        }
        OrgState::Active => Ok(()),
    }
}

impl Commands {
    /// Create an org, claiming its name.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty name after trimming, `AlreadyExists`
    /// with code `ORG-name-taken` when the name is claimed.
    pub async fn add_org(
        &self,
        instance_id: &str,
        name: &str,
        creator: &str,
    ) -> Result<OrgCreated> {
        let name = normalize_org_name(name)?;
        let org_id = self.ids.next_id();
        let aggregate = Aggregate::new(instance_id, AggregateType::Org, &org_id, &org_id);

        let command = Command::new(aggregate, ORG_ADDED, creator)
            .with_payload(&OrgNamed { name: name.clone() })?
            .with_constraint(UniqueConstraint::add(
                UNIQUE_ORG_NAME,
                name,
                "ORG-name-taken",
            ));

        let fresh = OrgWriteModel::new(instance_id, &org_id);
        let pushed = self.store.push(vec![command]).await?;
        let details = details_after(&fresh, &pushed)?;

        tracing::info!(org = %org_id, "org created");
        Ok(OrgCreated { org_id, details })
    }

    /// Rename an org, swapping the name constraint in the same push.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty name after trimming,
    /// `FailedPrecondition` with code `ORG-name-unchanged` when the trimmed
    /// name equals the current one, `AlreadyExists` when the new name is
    /// claimed, `NotFound` for an unknown or removed org.
    pub async fn change_org_name(
        &self,
        instance_id: &str,
        org_id: &str,
        name: &str,
        creator: &str,
    ) -> Result<ObjectDetails> {
        let name = normalize_org_name(name)?;
        let mut attempt = 0;
        loop {
            let mut model = OrgWriteModel::new(instance_id, org_id);
            load(self.store.as_ref(), &mut model).await?;
            loaded_org(&model)?;
            if model.name == name {
                return Err(Error::failed_precondition(
                    "ORG-name-unchanged",
                    "org name did not change",
                ));
            }

            let aggregate = Aggregate::new(
                instance_id,
                AggregateType::Org,
                org_id,
                &model.model.resource_owner,
            );
            let command = Command::new(aggregate, ORG_CHANGED, creator)
                .with_payload(&OrgNamed { name: name.clone() })?
                .with_constraint(UniqueConstraint::remove(UNIQUE_ORG_NAME, &model.name))
                .with_constraint(UniqueConstraint::add(
                    UNIQUE_ORG_NAME,
                    &name,
                    "ORG-name-taken",
                ));

            match self.store.push(vec![command]).await {
                Ok(pushed) => return details_after(&model, &pushed),
                Err(err) => self.retry_or_bail(&mut attempt, err)?,
            }
        }
    }

    /// Remove an org, releasing its name. Terminal: the aggregate accepts
    /// no further events, and the token projection drops every token owned
    /// by the org.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown or already removed org.
    pub async fn remove_org(
        &self,
        instance_id: &str,
        org_id: &str,
        creator: &str,
    ) -> Result<ObjectDetails> {
        let mut attempt = 0;
        loop {
            let mut model = OrgWriteModel::new(instance_id, org_id);
            load(self.store.as_ref(), &mut model).await?;
            loaded_org(&model)?;

            let aggregate = Aggregate::new(
                instance_id,
                AggregateType::Org,
                org_id,
                &model.model.resource_owner,
            );
            let command = Command::new(aggregate, ORG_REMOVED, creator)
                .with_constraint(UniqueConstraint::remove(UNIQUE_ORG_NAME, &model.name));

            match self.store.push(vec![command]).await {
                Ok(pushed) => {
                    tracing::info!(org = %org_id, "org removed");
                    return details_after(&model, &pushed);
                }
                Err(err) => self.retry_or_bail(&mut attempt, err)?,
            }
        }
    }
}
