//! Persisted entities.

use chrono::{DateTime, Utc};
use dodoco_common::types::{EngineId, Protocol, RecordId};
use serde::Serialize;

/// A container record and its pointer to the backing engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    /// Surrogate key, never reused.
    pub id: RecordId,
    /// User-facing label.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Exact `repo:tag` the record was created from.
    pub start_image_name: String,
    /// Live backing instance, if one exists.
    pub engine_container_id: Option<EngineId>,
    /// Engine-side name, stable across commits.
    pub engine_container_name: String,
    /// Number of successful commits.
    pub version: i64,
    /// Owning project.
    pub project_id: i64,
    /// Creating user.
    pub created_by: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Image the next backing instance must be created from.
    ///
    /// Version 0 is the start image; later versions are the committed
    /// snapshots tagged `{engine_container_name}:{version}`.
    #[must_use]
    pub fn current_image(&self) -> String {
        if self.version == 0 {
            self.start_image_name.clone()
        } else {
            format!("{}:{}", self.engine_container_name, self.version)
        }
    }
}

/// Fields required to insert a container record.
#[derive(Debug, Clone)]
pub struct NewContainer {
    /// User-facing label.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Normalized `repo:tag`.
    pub start_image_name: String,
    /// Generated engine-side name.
    pub engine_container_name: String,
    /// Owning project.
    pub project_id: i64,
    /// Creating user.
    pub created_by: i64,
}

/// A container-port to host-port binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    /// Surrogate key.
    pub id: i64,
    /// Owning container record.
    pub container_id: RecordId,
    /// Port inside the sandbox.
    pub container_port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Host-visible port.
    pub exposed_port: u16,
}

impl PortMapping {
    /// Key under which the engine expects this binding.
    #[must_use]
    pub fn binding_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Fields required to insert a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPortMapping {
    /// Owning container record.
    pub container_id: RecordId,
    /// Port inside the sandbox.
    pub container_port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Host-visible port.
    pub exposed_port: u16,
}

/// Outcome of a port insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortInsert {
    /// The mapping was stored.
    Inserted(PortMapping),
    /// Another mapping already holds this host port for the protocol.
    HostPortTaken,
}

/// A project that owns containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    /// Surrogate key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Whether an admin approved the project.
    pub approved: bool,
    /// Maximum number of containers the project may own.
    pub max_container_limit: i64,
    /// Creating user.
    pub created_by: Option<i64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// When the project was frozen.
    pub frozen_at: Option<DateTime<Utc>>,
    /// When the project was deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Returns whether the project is neither frozen nor deleted.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.frozen_at.is_none() && self.deleted_at.is_none()
    }
}

/// Fields required to insert a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Initial approval state.
    pub approved: bool,
    /// Container limit.
    pub max_container_limit: i64,
    /// Creating user.
    pub created_by: Option<i64>,
}

/// Membership of a user in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectMember {
    /// Surrogate key.
    pub id: i64,
    /// Project.
    pub project_id: i64,
    /// Member user.
    pub user_id: i64,
    /// Whether the user accepted the invitation.
    pub accepted: bool,
    /// Whether the user leads the project.
    pub leader: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: i64) -> ContainerRecord {
        ContainerRecord {
            id: RecordId::new(1),
            name: "box".into(),
            description: None,
            start_image_name: "ubuntu:latest".into(),
            engine_container_id: None,
            engine_container_name: "ubuntu_abc".into(),
            version,
            project_id: 1,
            created_by: 1,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn current_image_follows_version() {
        assert_eq!(record(0).current_image(), "ubuntu:latest");
        assert_eq!(record(3).current_image(), "ubuntu_abc:3");
    }

    #[test]
    fn binding_key_shape() {
        let mapping = PortMapping {
            id: 1,
            container_id: RecordId::new(1),
            container_port: 22,
            protocol: Protocol::Udp,
            exposed_port: 50000,
        };
        assert_eq!(mapping.binding_key(), "22/udp");
    }
}
