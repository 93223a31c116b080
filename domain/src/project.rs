//! Project aggregate events.
//!
//! Token cascade deletes need the project's OIDC applications: the
//! application events carry both the application id and, for OIDC apps, the
//! issued client id.

use serde::{Deserialize, Serialize};

use garrison_core::event::{EventType, StoredEvent};
use garrison_core::registry::EventRegistry;
use garrison_core::{Error, Result};

use crate::registry::AnyEvent;

/// `project.added`
pub const PROJECT_ADDED: EventType = EventType::from_static("project.added");
/// `project.application.added`
pub const APPLICATION_ADDED: EventType = EventType::from_static("project.application.added");
/// `project.application.deactivated`
pub const APPLICATION_DEACTIVATED: EventType =
    EventType::from_static("project.application.deactivated");
/// `project.application.removed`
pub const APPLICATION_REMOVED: EventType = EventType::from_static("project.application.removed");
/// `project.deactivated`
pub const PROJECT_DEACTIVATED: EventType = EventType::from_static("project.deactivated");
/// `project.removed`; terminal.
pub const PROJECT_REMOVED: EventType = EventType::from_static("project.removed");

/// Payload of [`PROJECT_ADDED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAdded {
    /// Display name.
    pub name: String,
}

/// Payload of [`APPLICATION_ADDED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationAdded {
    /// Application id within the project.
    pub app_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// OIDC client id; `None` for non-OIDC applications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_client_id: Option<String>,
}

/// Payload of the application lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationScoped {
    /// Affected application id.
    pub app_id: String,
}

/// Decoded project event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    /// Project created.
    Added(ProjectAdded),
    /// Application created.
    ApplicationAdded(ApplicationAdded),
    /// Application deactivated.
    ApplicationDeactivated(ApplicationScoped),
    /// Application removed.
    ApplicationRemoved(ApplicationScoped),
    /// Project deactivated.
    Deactivated,
    /// Project removed; terminal.
    Removed,
}

impl ProjectEvent {
    /// Decode a stored project event.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable payloads or non-project tags.
    pub fn decode(event: &StoredEvent) -> Result<Self> {
        match &event.event_type {
            t if *t == PROJECT_ADDED => Ok(Self::Added(event.unmarshal()?)),
            t if *t == APPLICATION_ADDED => Ok(Self::ApplicationAdded(event.unmarshal()?)),
            t if *t == APPLICATION_DEACTIVATED => {
                Ok(Self::ApplicationDeactivated(event.unmarshal()?))
            }
            t if *t == APPLICATION_REMOVED => Ok(Self::ApplicationRemoved(event.unmarshal()?)),
            t if *t == PROJECT_DEACTIVATED => Ok(Self::Deactivated),
            t if *t == PROJECT_REMOVED => Ok(Self::Removed),
            other => Err(Error::internal(
                "PROJECT-event-unknown",
                format!("not a project event: {other}"),
            )),
        }
    }

    pub(crate) fn register(registry: &mut EventRegistry<AnyEvent>) {
        for tag in [
            PROJECT_ADDED,
            APPLICATION_ADDED,
            APPLICATION_DEACTIVATED,
            APPLICATION_REMOVED,
            PROJECT_DEACTIVATED,
            PROJECT_REMOVED,
        ] {
            registry.register(tag, |e| Ok(AnyEvent::Project(ProjectEvent::decode(e)?)));
        }
    }
}
