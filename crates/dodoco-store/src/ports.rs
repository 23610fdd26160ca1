//! Port mapping access.

use std::collections::HashSet;

use dodoco_common::error::Result;
use dodoco_common::types::{Protocol, RecordId};
use rusqlite::{Row, params};

use crate::models::{NewPortMapping, PortInsert, PortMapping};
use crate::session::{Session, conversion_err, db_err, is_unique_violation};

fn map_row(row: &Row<'_>) -> rusqlite::Result<PortMapping> {
    let protocol: String = row.get(3)?;
    Ok(PortMapping {
        id: row.get(0)?,
        container_id: RecordId::new(row.get(1)?),
        container_port: row.get(2)?,
        protocol: protocol.parse::<Protocol>().map_err(|e| conversion_err(3, e))?,
        exposed_port: row.get(4)?,
    })
}

impl Session<'_> {
    /// Host ports already bound for a protocol.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn used_ports(&self, protocol: Protocol) -> Result<HashSet<u16>> {
        let mut stmt = self
            .conn
            .prepare("SELECT exposed_port FROM container_ports WHERE protocol = ?1")
            .map_err(|e| db_err("store.used_ports", &e))?;
        let rows = stmt
            .query_map(params![protocol.as_str()], |r| r.get::<_, u16>(0))
            .map_err(|e| db_err("store.used_ports", &e))?;
        rows.collect::<rusqlite::Result<HashSet<_>>>()
            .map_err(|e| db_err("store.used_ports", &e))
    }

    /// Inserts a mapping.
    ///
    /// A collision on `(protocol, exposed_port)` is reported as
    /// [`PortInsert::HostPortTaken`] so the caller can pick another port.
    ///
    /// # Errors
    ///
    /// `Conflict` if the container already maps this port and protocol;
    /// `Infra` on other failures.
    pub fn insert_port(&self, new: NewPortMapping) -> Result<PortInsert> {
        let result = self.conn.execute(
            "INSERT INTO container_ports (container_id, container_port, protocol, exposed_port)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.container_id.get(),
                new.container_port,
                new.protocol.as_str(),
                new.exposed_port,
            ],
        );
        match result {
            Ok(_) => Ok(PortInsert::Inserted(PortMapping {
                id: self.conn.last_insert_rowid(),
                container_id: new.container_id,
                container_port: new.container_port,
                protocol: new.protocol,
                exposed_port: new.exposed_port,
            })),
            Err(e) if is_unique_violation(&e) && e.to_string().contains("exposed_port") => {
                tracing::debug!(
                    protocol = %new.protocol,
                    port = new.exposed_port,
                    "host port already bound"
                );
                Ok(PortInsert::HostPortTaken)
            }
            Err(e) => Err(db_err("store.insert_port", &e)),
        }
    }

    /// Mappings owned by a container, ordered by container port.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn ports_of(&self, container_id: RecordId) -> Result<Vec<PortMapping>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, container_id, container_port, protocol, exposed_port
                 FROM container_ports WHERE container_id = ?1
                 ORDER BY container_port, protocol",
            )
            .map_err(|e| db_err("store.ports_of", &e))?;
        let rows = stmt
            .query_map(params![container_id.get()], map_row)
            .map_err(|e| db_err("store.ports_of", &e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("store.ports_of", &e))
    }

    /// Deletes single mappings by id. Returns how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete fails.
    pub fn delete_ports(&self, ids: &[i64]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            removed += self
                .conn
                .execute("DELETE FROM container_ports WHERE id = ?1", params![id])
                .map_err(|e| db_err("store.delete_ports", &e))?;
        }
        Ok(removed)
    }

    /// Deletes every mapping owned by a container. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_ports_of(&self, container_id: RecordId) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM container_ports WHERE container_id = ?1",
                params![container_id.get()],
            )
            .map_err(|e| db_err("store.delete_ports_of", &e))
    }
}
