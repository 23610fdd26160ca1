//! Database schema.

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Table definitions. Idempotent.
///
/// Ownership runs one way: members and containers point at their project,
/// ports point at their container. Deleting a parent cascades.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT    NOT NULL,
    description         TEXT,
    approved            INTEGER NOT NULL DEFAULT 0,
    max_container_limit INTEGER NOT NULL DEFAULT 0,
    created_by          INTEGER,
    created_at          TEXT    NOT NULL,
    modified_at         TEXT    NOT NULL,
    frozen_at           TEXT,
    deleted_at          TEXT
);

CREATE TABLE IF NOT EXISTS project_members (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    user_id    INTEGER NOT NULL,
    accepted   INTEGER NOT NULL DEFAULT 0,
    leader     INTEGER NOT NULL DEFAULT 0,
    UNIQUE (project_id, user_id)
);

CREATE TABLE IF NOT EXISTS containers (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    name                  TEXT    NOT NULL,
    description           TEXT,
    start_image_name      TEXT    NOT NULL,
    engine_container_id   TEXT,
    engine_container_name TEXT    NOT NULL UNIQUE,
    version               INTEGER NOT NULL DEFAULT 0,
    project_id            INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    created_by            INTEGER NOT NULL,
    created_at            TEXT    NOT NULL,
    modified_at           TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS containers_project ON containers(project_id);

CREATE TABLE IF NOT EXISTS container_ports (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id   INTEGER NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
    container_port INTEGER NOT NULL CHECK (container_port BETWEEN 1 AND 65535),
    protocol       TEXT    NOT NULL CHECK (protocol IN ('tcp', 'udp', 'stcp')),
    exposed_port   INTEGER NOT NULL CHECK (exposed_port BETWEEN 1 AND 65535),
    UNIQUE (container_id, container_port, protocol),
    UNIQUE (protocol, exposed_port)
);
";
