//! Serializable projections of records for callers.

use chrono::{DateTime, Utc};
use dodoco_common::types::{ContainerState, Protocol, RecordId};
use dodoco_store::models::{ContainerRecord, PortMapping, Project};
use serde::Serialize;

/// Short description of the owning project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    /// Project id.
    pub id: i64,
    /// Project name.
    pub name: String,
}

/// A single published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortView {
    /// Port inside the sandbox.
    pub container_port: u16,
    /// Protocol.
    pub protocol: Protocol,
    /// Host-visible port.
    pub exposed_port: u16,
}

impl From<&PortMapping> for PortView {
    fn from(m: &PortMapping) -> Self {
        Self {
            container_port: m.container_port,
            protocol: m.protocol,
            exposed_port: m.exposed_port,
        }
    }
}

/// Everything a caller needs to show one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerView {
    /// Record id.
    pub id: RecordId,
    /// User-facing label.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Image the record was created from.
    pub start_image_name: String,
    /// Image the backing instance runs (or will run).
    pub current_image: String,
    /// Commit count.
    pub version: i64,
    /// Whether the container was committed at least once.
    pub committed: bool,
    /// Whether the record changed since it was created.
    pub modified: bool,
    /// Backing instance id, absent when unprovisioned.
    pub engine_container_id: Option<String>,
    /// Stable engine-side name.
    pub engine_container_name: String,
    /// Observed lifecycle state.
    pub state: ContainerState,
    /// Creating user.
    pub created_by: i64,
    /// Creation time (RFC 3339).
    pub created_at: DateTime<Utc>,
    /// Creation time (unix seconds).
    pub created_at_unix: i64,
    /// Last modification time (RFC 3339).
    pub modified_at: DateTime<Utc>,
    /// Last modification time (unix seconds).
    pub modified_at_unix: i64,
    /// Owning project.
    pub project: ProjectSummary,
    /// Published ports.
    pub ports: Vec<PortView>,
}

impl ContainerView {
    /// Assembles a view from its parts.
    #[must_use]
    pub fn build(
        record: &ContainerRecord,
        project: &Project,
        ports: &[PortMapping],
        state: ContainerState,
    ) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            description: record.description.clone(),
            start_image_name: record.start_image_name.clone(),
            current_image: record.current_image(),
            version: record.version,
            committed: record.version > 0,
            modified: record.modified_at != record.created_at,
            engine_container_id: record
                .engine_container_id
                .as_ref()
                .map(|id| id.as_str().to_owned()),
            engine_container_name: record.engine_container_name.clone(),
            state,
            created_by: record.created_by,
            created_at: record.created_at,
            created_at_unix: record.created_at.timestamp(),
            modified_at: record.modified_at,
            modified_at_unix: record.modified_at.timestamp(),
            project: ProjectSummary {
                id: project.id,
                name: project.name.clone(),
            },
            ports: ports.iter().map(PortView::from).collect(),
        }
    }
}
