//! Project and membership access.

use chrono::Utc;
use dodoco_common::error::Result;
use rusqlite::{OptionalExtension, Row, params};

use crate::models::{NewProject, Project, ProjectMember};
use crate::session::{Session, db_err};

const COLUMNS: &str = "id, name, description, approved, max_container_limit, created_by, \
     created_at, modified_at, frozen_at, deleted_at";

fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        approved: row.get(3)?,
        max_container_limit: row.get(4)?,
        created_by: row.get(5)?,
        created_at: row.get(6)?,
        modified_at: row.get(7)?,
        frozen_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}

fn map_member(row: &Row<'_>) -> rusqlite::Result<ProjectMember> {
    Ok(ProjectMember {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        accepted: row.get(3)?,
        leader: row.get(4)?,
    })
}

impl Session<'_> {
    /// Inserts a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_project(&self, new: &NewProject) -> Result<Project> {
        let now = Utc::now();
        let _ = self
            .conn
            .execute(
                "INSERT INTO projects (name, description, approved, max_container_limit,
                                       created_by, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    new.name,
                    new.description,
                    new.approved,
                    new.max_container_limit,
                    new.created_by,
                    now,
                ],
            )
            .map_err(|e| db_err("store.insert_project", &e))?;
        Ok(Project {
            id: self.conn.last_insert_rowid(),
            name: new.name.clone(),
            description: new.description.clone(),
            approved: new.approved,
            max_container_limit: new.max_container_limit,
            created_by: new.created_by,
            created_at: now,
            modified_at: now,
            frozen_at: None,
            deleted_at: None,
        })
    }

    /// Loads a project regardless of its lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM projects WHERE id = ?1"),
                params![id],
                map_project,
            )
            .optional()
            .map_err(|e| db_err("store.project", &e))
    }

    /// Loads a project only if it is neither frozen nor deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn active_project(&self, id: i64) -> Result<Option<Project>> {
        Ok(self.project(id)?.filter(Project::is_active))
    }

    /// Lists every project, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM projects ORDER BY id"))
            .map_err(|e| db_err("store.projects", &e))?;
        let rows = stmt
            .query_map([], map_project)
            .map_err(|e| db_err("store.projects", &e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("store.projects", &e))
    }

    /// Sets the approval flag. Returns whether a project was updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_project_approved(&self, id: i64, approved: bool) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE projects SET approved = ?2, modified_at = ?3 WHERE id = ?1",
                params![id, approved, Utc::now()],
            )
            .map_err(|e| db_err("store.set_project_approved", &e))?;
        Ok(updated > 0)
    }

    /// Stamps `frozen_at` on an active project.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_project_frozen(&self, id: i64) -> Result<bool> {
        let now = Utc::now();
        let updated = self
            .conn
            .execute(
                "UPDATE projects SET frozen_at = ?2, modified_at = ?2
                 WHERE id = ?1 AND frozen_at IS NULL AND deleted_at IS NULL",
                params![id, now],
            )
            .map_err(|e| db_err("store.mark_project_frozen", &e))?;
        Ok(updated > 0)
    }

    /// Stamps `deleted_at` on a project that is not already deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_project_deleted(&self, id: i64) -> Result<bool> {
        let now = Utc::now();
        let updated = self
            .conn
            .execute(
                "UPDATE projects SET deleted_at = ?2, modified_at = ?2
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, now],
            )
            .map_err(|e| db_err("store.mark_project_deleted", &e))?;
        Ok(updated > 0)
    }

    /// Adds a user to a project, or updates an existing membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_member(
        &self,
        project_id: i64,
        user_id: i64,
        accepted: bool,
        leader: bool,
    ) -> Result<ProjectMember> {
        let _ = self
            .conn
            .execute(
                "INSERT INTO project_members (project_id, user_id, accepted, leader)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (project_id, user_id)
                 DO UPDATE SET accepted = excluded.accepted, leader = excluded.leader",
                params![project_id, user_id, accepted, leader],
            )
            .map_err(|e| db_err("store.upsert_member", &e))?;
        self.conn
            .query_row(
                "SELECT id, project_id, user_id, accepted, leader
                 FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                map_member,
            )
            .map_err(|e| db_err("store.upsert_member", &e))
    }

    /// Looks up one user's membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn member(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectMember>> {
        self.conn
            .query_row(
                "SELECT id, project_id, user_id, accepted, leader
                 FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                map_member,
            )
            .optional()
            .map_err(|e| db_err("store.member", &e))
    }

    /// Lists a project's members.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn members(&self, project_id: i64) -> Result<Vec<ProjectMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, user_id, accepted, leader
                 FROM project_members WHERE project_id = ?1 ORDER BY user_id",
            )
            .map_err(|e| db_err("store.members", &e))?;
        let rows = stmt
            .query_map(params![project_id], map_member)
            .map_err(|e| db_err("store.members", &e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("store.members", &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn new_project(approved: bool) -> NewProject {
        NewProject {
            name: "research".into(),
            description: Some("lab".into()),
            approved,
            max_container_limit: 3,
            created_by: Some(1),
        }
    }

    #[test]
    fn frozen_project_is_not_active() {
        let store = Store::in_memory().expect("store");
        let p = store.write(|s| s.insert_project(&new_project(true))).expect("insert");
        assert!(store.read(|s| s.active_project(p.id)).expect("load").is_some());

        assert!(store.write(|s| s.mark_project_frozen(p.id)).expect("freeze"));
        assert!(!store.write(|s| s.mark_project_frozen(p.id)).expect("freeze again"));
        assert!(store.read(|s| s.active_project(p.id)).expect("load").is_none());
        let raw = store.read(|s| s.project(p.id)).expect("load").expect("present");
        assert!(raw.frozen_at.is_some());
    }

    #[test]
    fn approval_toggles() {
        let store = Store::in_memory().expect("store");
        let p = store.write(|s| s.insert_project(&new_project(false))).expect("insert");
        assert!(store.write(|s| s.set_project_approved(p.id, true)).expect("approve"));
        let loaded = store.read(|s| s.project(p.id)).expect("load").expect("present");
        assert!(loaded.approved);
        assert!(!store.write(|s| s.set_project_approved(999, true)).expect("missing"));
    }

    #[test]
    fn membership_upsert() {
        let store = Store::in_memory().expect("store");
        let p = store.write(|s| s.insert_project(&new_project(true))).expect("insert");

        let m = store
            .write(|s| s.upsert_member(p.id, 42, false, false))
            .expect("add");
        assert!(!m.accepted);
        let m2 = store
            .write(|s| s.upsert_member(p.id, 42, true, true))
            .expect("update");
        assert_eq!(m.id, m2.id);
        assert!(m2.accepted && m2.leader);

        assert_eq!(store.read(|s| s.members(p.id)).expect("members").len(), 1);
        assert!(store.read(|s| s.member(p.id, 7)).expect("member").is_none());
    }
}
