//! Project approval, membership, and container-limit checks.

use dodoco_common::error::{DodocoError, Result};
use dodoco_common::types::Requester;
use dodoco_store::Session;
use dodoco_store::models::Project;

/// Gatekeeper for container creation.
///
/// Runs inside the same transaction that inserts the record, so the count
/// it observes cannot change before the insert lands.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectQuotaGuard;

impl ProjectQuotaGuard {
    /// Checks that `requester` may add a container to `project_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the project is missing, frozen, or deleted.
    /// - `NotApproved` if the project has not been approved.
    /// - `Forbidden` if the requester is neither admin nor accepted member.
    /// - `QuotaExceeded` if the project is at its container limit.
    pub fn authorize(session: &Session<'_>, project_id: i64, requester: Requester) -> Result<Project> {
        let project = session
            .active_project(project_id)?
            .ok_or_else(|| DodocoError::not_found("project", project_id))?;

        if !project.approved {
            return Err(DodocoError::NotApproved { project_id });
        }

        Self::require_member(session, &project, requester)?;

        let count = session.count_containers(project_id)?;
        if count >= project.max_container_limit {
            tracing::info!(
                project = project_id,
                count,
                limit = project.max_container_limit,
                "container quota reached"
            );
            return Err(DodocoError::QuotaExceeded {
                project_id,
                limit: project.max_container_limit,
            });
        }
        Ok(project)
    }

    /// Checks that `requester` is an admin or an accepted member.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` otherwise, or the store error.
    pub fn require_member(session: &Session<'_>, project: &Project, requester: Requester) -> Result<()> {
        if requester.is_admin {
            return Ok(());
        }
        let accepted = session
            .member(project.id, requester.user_id)?
            .is_some_and(|m| m.accepted);
        if accepted {
            Ok(())
        } else {
            Err(DodocoError::Forbidden {
                user_id: requester.user_id,
                project_id: project.id,
            })
        }
    }
}
