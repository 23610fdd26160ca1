//! Container record access.

use chrono::Utc;
use dodoco_common::error::{DodocoError, Result};
use dodoco_common::types::{EngineId, RecordId};
use rusqlite::{OptionalExtension, Row, params};

use crate::models::{ContainerRecord, NewContainer};
use crate::session::{Session, db_err};

const COLUMNS: &str = "id, name, description, start_image_name, engine_container_id, \
     engine_container_name, version, project_id, created_by, created_at, modified_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<ContainerRecord> {
    Ok(ContainerRecord {
        id: RecordId::new(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        start_image_name: row.get(3)?,
        engine_container_id: row.get::<_, Option<String>>(4)?.map(EngineId::new),
        engine_container_name: row.get(5)?,
        version: row.get(6)?,
        project_id: row.get(7)?,
        created_by: row.get(8)?,
        created_at: row.get(9)?,
        modified_at: row.get(10)?,
    })
}

impl Session<'_> {
    /// Inserts a record with no backing instance and version 0.
    ///
    /// # Errors
    ///
    /// `Conflict` if the engine name is taken; `Infra` on other failures.
    pub fn insert_container(&self, new: &NewContainer) -> Result<ContainerRecord> {
        let now = Utc::now();
        let _ = self
            .conn
            .execute(
                "INSERT INTO containers (name, description, start_image_name, engine_container_name,
                                         version, project_id, created_by, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?7)",
                params![
                    new.name,
                    new.description,
                    new.start_image_name,
                    new.engine_container_name,
                    new.project_id,
                    new.created_by,
                    now,
                ],
            )
            .map_err(|e| db_err("store.insert_container", &e))?;
        let id = RecordId::new(self.conn.last_insert_rowid());
        Ok(ContainerRecord {
            id,
            name: new.name.clone(),
            description: new.description.clone(),
            start_image_name: new.start_image_name.clone(),
            engine_container_id: None,
            engine_container_name: new.engine_container_name.clone(),
            version: 0,
            project_id: new.project_id,
            created_by: new.created_by,
            created_at: now,
            modified_at: now,
        })
    }

    /// Loads a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn container(&self, id: RecordId) -> Result<Option<ContainerRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM containers WHERE id = ?1"),
                params![id.get()],
                map_row,
            )
            .optional()
            .map_err(|e| db_err("store.container", &e))
    }

    /// Lists records, optionally restricted to one project, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn containers(&self, project_id: Option<i64>) -> Result<Vec<ContainerRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM containers
                 WHERE ?1 IS NULL OR project_id = ?1
                 ORDER BY id"
            ))
            .map_err(|e| db_err("store.containers", &e))?;
        let rows = stmt
            .query_map(params![project_id], map_row)
            .map_err(|e| db_err("store.containers", &e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("store.containers", &e))
    }

    /// Counts the records owned by a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_containers(&self, project_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM containers WHERE project_id = ?1",
                params![project_id],
                |r| r.get(0),
            )
            .map_err(|e| db_err("store.count_containers", &e))
    }

    /// Points a record at a backing instance, or clears the pointer.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record is gone; `Infra` if the update fails.
    pub fn set_engine_id(&self, id: RecordId, engine_id: Option<&EngineId>) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE containers SET engine_container_id = ?2, modified_at = ?3 WHERE id = ?1",
                params![id.get(), engine_id.map(EngineId::as_str), Utc::now()],
            )
            .map_err(|e| db_err("store.set_engine_id", &e))?;
        if updated == 0 {
            return Err(DodocoError::not_found("container", id));
        }
        Ok(())
    }

    /// Records a new commit version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record is gone; `Infra` if the update fails.
    pub fn set_version(&self, id: RecordId, version: i64) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE containers SET version = ?2, modified_at = ?3 WHERE id = ?1",
                params![id.get(), version, Utc::now()],
            )
            .map_err(|e| db_err("store.set_version", &e))?;
        if updated == 0 {
            return Err(DodocoError::not_found("container", id));
        }
        Ok(())
    }

    /// Deletes a record and its port mappings. Returns whether a record
    /// was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if either delete fails.
    pub fn delete_container(&self, id: RecordId) -> Result<bool> {
        let _ = self.delete_ports_of(id)?;
        let removed = self
            .conn
            .execute("DELETE FROM containers WHERE id = ?1", params![id.get()])
            .map_err(|e| db_err("store.delete_container", &e))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use dodoco_common::error::ErrorKind;

    use super::*;
    use crate::Store;
    use crate::models::NewProject;

    fn seed(store: &Store) -> i64 {
        store
            .write(|s| {
                s.insert_project(&NewProject {
                    name: "p".into(),
                    description: None,
                    approved: true,
                    max_container_limit: 5,
                    created_by: Some(1),
                })
            })
            .expect("project")
            .id
    }

    fn new_container(project_id: i64, engine_name: &str) -> NewContainer {
        NewContainer {
            name: "box".into(),
            description: Some("scratch".into()),
            start_image_name: "ubuntu:latest".into(),
            engine_container_name: engine_name.into(),
            project_id,
            created_by: 7,
        }
    }

    #[test]
    fn insert_and_load_round_trip() {
        let store = Store::in_memory().expect("store");
        let project = seed(&store);
        let inserted = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_a")))
            .expect("insert");

        let loaded = store
            .read(|s| s.container(inserted.id))
            .expect("load")
            .expect("present");
        assert_eq!(loaded.engine_container_name, "ubuntu_a");
        assert_eq!(loaded.version, 0);
        assert!(loaded.engine_container_id.is_none());
        assert_eq!(loaded.created_by, 7);
    }

    #[test]
    fn duplicate_engine_name_is_conflict() {
        let store = Store::in_memory().expect("store");
        let project = seed(&store);
        let _ = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_a")))
            .expect("first");
        let err = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_a")))
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn engine_id_and_version_updates() {
        let store = Store::in_memory().expect("store");
        let project = seed(&store);
        let rec = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_a")))
            .expect("insert");

        store
            .write(|s| {
                s.set_engine_id(rec.id, Some(&EngineId::new("abc")))?;
                s.set_version(rec.id, 2)
            })
            .expect("update");
        let loaded = store.read(|s| s.container(rec.id)).expect("load").expect("present");
        assert_eq!(loaded.engine_container_id, Some(EngineId::new("abc")));
        assert_eq!(loaded.version, 2);

        store.write(|s| s.set_engine_id(rec.id, None)).expect("clear");
        let loaded = store.read(|s| s.container(rec.id)).expect("load").expect("present");
        assert!(loaded.engine_container_id.is_none());
    }

    #[test]
    fn updates_on_a_deleted_record_are_not_found() {
        let store = Store::in_memory().expect("store");
        let project = seed(&store);
        let rec = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_a")))
            .expect("insert");
        let _ = store.write(|s| s.delete_container(rec.id)).expect("delete");

        let err = store
            .write(|s| s.set_engine_id(rec.id, Some(&EngineId::new("abc"))))
            .expect_err("engine id on missing record");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = store
            .write(|s| s.set_version(rec.id, 1))
            .expect_err("version on missing record");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn delete_reports_absence_second_time() {
        let store = Store::in_memory().expect("store");
        let project = seed(&store);
        let rec = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_a")))
            .expect("insert");
        assert!(store.write(|s| s.delete_container(rec.id)).expect("delete"));
        assert!(!store.write(|s| s.delete_container(rec.id)).expect("delete again"));
        assert_eq!(store.read(|s| s.count_containers(project)).expect("count"), 0);
    }

    #[test]
    fn ids_are_not_reused() {
        let store = Store::in_memory().expect("store");
        let project = seed(&store);
        let first = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_a")))
            .expect("insert");
        let _ = store.write(|s| s.delete_container(first.id)).expect("delete");
        let second = store
            .write(|s| s.insert_container(&new_container(project, "ubuntu_b")))
            .expect("insert");
        assert!(second.id > first.id);
    }

    #[test]
    fn list_filters_by_project() {
        let store = Store::in_memory().expect("store");
        let p1 = seed(&store);
        let p2 = seed(&store);
        let _ = store
            .write(|s| s.insert_container(&new_container(p1, "ubuntu_a")))
            .expect("insert");
        let _ = store
            .write(|s| s.insert_container(&new_container(p2, "ubuntu_b")))
            .expect("insert");
        assert_eq!(store.read(|s| s.containers(Some(p1))).expect("list").len(), 1);
        assert_eq!(store.read(|s| s.containers(None)).expect("list").len(), 2);
    }
}
