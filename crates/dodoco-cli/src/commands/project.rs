//! `dodoco project` — Project and membership administration.

use anyhow::bail;
use clap::{Args, Subcommand};
use dodoco_store::models::NewProject;

use super::Context;
use crate::output;

/// Arguments for the `project` command.
#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// Action to perform.
    #[command(subcommand)]
    pub action: ProjectAction,
}

/// Project actions.
#[derive(Subcommand, Debug)]
pub enum ProjectAction {
    /// Register a project.
    Add {
        /// Display name.
        name: String,
        /// Free-form description.
        #[arg(long)]
        description: Option<String>,
        /// Maximum number of containers.
        #[arg(long, default_value_t = 1)]
        limit: i64,
        /// Approve immediately (admin only).
        #[arg(long)]
        approved: bool,
    },
    /// Add or update a member.
    Member {
        /// Project id.
        project: i64,
        /// User id.
        user: i64,
        /// Mark the invitation as accepted.
        #[arg(long)]
        accepted: bool,
        /// Make the user a project leader.
        #[arg(long)]
        leader: bool,
    },
    /// Approve or revoke a project (admin only).
    Approve {
        /// Project id.
        project: i64,
        /// Revoke instead of approving.
        #[arg(long)]
        revoke: bool,
    },
    /// Freeze a project and destroy its containers (admin only).
    Freeze {
        /// Project id.
        project: i64,
    },
    /// Delete a project and destroy its containers (admin only).
    Delete {
        /// Project id.
        project: i64,
    },
    /// List projects.
    List,
}

/// Executes the `project` command.
///
/// # Errors
///
/// Returns an error if the caller lacks rights or the store fails.
pub fn execute(ctx: &Context, args: ProjectArgs) -> anyhow::Result<()> {
    let orch = &ctx.orchestrator;
    let store = orch.store();
    match args.action {
        ProjectAction::Add {
            name,
            description,
            limit,
            approved,
        } => {
            if approved && !ctx.requester.is_admin {
                bail!("only admins may approve projects");
            }
            let project = store.write(|s| {
                let project = s.insert_project(&NewProject {
                    name,
                    description,
                    approved,
                    max_container_limit: limit,
                    created_by: Some(ctx.requester.user_id),
                })?;
                let _ = s.upsert_member(project.id, ctx.requester.user_id, true, true)?;
                Ok(project)
            })?;
            tracing::info!(project = project.id, "project registered");
            if ctx.json {
                output::print_json(&project)?;
            } else {
                println!("Project {} '{}' created.", project.id, project.name);
            }
        }
        ProjectAction::Member {
            project,
            user,
            accepted,
            leader,
        } => {
            let member = store.write(|s| s.upsert_member(project, user, accepted, leader))?;
            if ctx.json {
                output::print_json(&member)?;
            } else {
                println!("User {user} in project {project}: accepted={accepted} leader={leader}");
            }
        }
        ProjectAction::Approve { project, revoke } => {
            if !ctx.requester.is_admin {
                bail!("only admins may approve projects");
            }
            if !store.write(|s| s.set_project_approved(project, !revoke))? {
                bail!("project {project} not found");
            }
            println!("Project {project} {}.", if revoke { "revoked" } else { "approved" });
        }
        ProjectAction::Freeze { project } => {
            let report = orch.freeze_project(ctx.requester, project)?;
            output::print_cascade(&report, ctx.json)?;
        }
        ProjectAction::Delete { project } => {
            let report = orch.delete_project(ctx.requester, project)?;
            output::print_cascade(&report, ctx.json)?;
        }
        ProjectAction::List => {
            let projects = store.read(|s| s.projects())?;
            if ctx.json {
                output::print_json(&projects)?;
            } else {
                println!("{:<6} {:<24} {:<9} {:<6} {:<8}", "ID", "NAME", "APPROVED", "LIMIT", "STATUS");
                for p in &projects {
                    let status = if p.deleted_at.is_some() {
                        "deleted"
                    } else if p.frozen_at.is_some() {
                        "frozen"
                    } else {
                        "active"
                    };
                    println!(
                        "{:<6} {:<24} {:<9} {:<6} {:<8}",
                        p.id, p.name, p.approved, p.max_container_limit, status
                    );
                }
            }
        }
    }
    Ok(())
}
