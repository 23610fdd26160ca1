//! Container lifecycle orchestration.
//!
//! Every operation claims its record in the in-flight table, then re-reads
//! the record before touching the engine. A record's `engine_container_id`
//! is cleared before its instance is replaced, so a failed recreate leaves
//! the record unprovisioned rather than pointing at a removed instance.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dodoco_common::config::DodocoConfig;
use dodoco_common::error::{DodocoError, Result};
use dodoco_common::types::{
    ContainerState, EngineId, PortSpec, ProtocolSpec, RecordId, Requester, StopMode,
    generate_engine_name,
};
use dodoco_engine::archive::pack_file;
use dodoco_engine::client::{
    CommitSpec, CreateSpec, EngineClient, EngineResult, create_with_pull,
};
use dodoco_engine::exec::ExecOutput;
use dodoco_store::Store;
use dodoco_store::models::{ContainerRecord, NewContainer, PortMapping};
use serde::Serialize;

use crate::image::ImagePolicy;
use crate::locks::RecordLocks;
use crate::ports::{PortAllocator, PortRequest};
use crate::quota::ProjectQuotaGuard;
use crate::view::ContainerView;

/// Parameters of a create call.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Owning project.
    pub project_id: i64,
    /// User-facing label.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Requested `name[:tag]`.
    pub image: String,
    /// Ports to publish. Empty means the image's defaults.
    pub ports: Vec<PortSpec>,
    /// Start the instance once created.
    pub start: bool,
}

/// Result of a destroy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyOutcome {
    /// The record (and its instance, if any) was removed.
    Destroyed,
    /// There was nothing to destroy.
    NotFound,
}

/// A record an aggregate operation could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    /// Affected record.
    pub id: RecordId,
    /// Error description.
    pub error: String,
}

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Records whose instance exists, or that have none.
    pub kept: usize,
    /// Records deleted because their instance was gone.
    pub removed: Vec<RecordId>,
    /// Records that could not be checked.
    pub failed: Vec<RecordFailure>,
}

/// Outcome of a project freeze or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    /// Project that was retired.
    pub project_id: i64,
    /// Containers destroyed.
    pub destroyed: Vec<RecordId>,
    /// Containers whose destroy failed.
    pub failed: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retire {
    Freeze,
    Delete,
}

/// Coordinates the store and the engine for every container operation.
pub struct Orchestrator {
    store: Store,
    engine: RwLock<Arc<dyn EngineClient>>,
    ports: PortAllocator,
    images: ImagePolicy,
    locks: RecordLocks,
    network_mode: String,
    stop_timeout: Duration,
}

impl Orchestrator {
    /// Builds an orchestrator over an opened store and an engine client.
    #[must_use]
    pub fn new(store: Store, engine: Arc<dyn EngineClient>, config: &DodocoConfig) -> Self {
        Self {
            store,
            engine: RwLock::new(engine),
            ports: PortAllocator::new(config.ports),
            images: ImagePolicy::new(config.images.clone()),
            locks: RecordLocks::new(),
            network_mode: config.engine.network_mode.clone(),
            stop_timeout: Duration::from_secs(config.default_stop_timeout_secs),
        }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// The image policy in force.
    #[must_use]
    pub const fn images(&self) -> &ImagePolicy {
        &self.images
    }

    /// Swaps the engine client. Operations already running keep the old one.
    ///
    /// # Errors
    ///
    /// Returns `Infra` if the client slot is poisoned.
    pub fn replace_engine(&self, engine: Arc<dyn EngineClient>) -> Result<()> {
        let mut slot = self
            .engine
            .write()
            .map_err(|_| DodocoError::infra("engine.replace", "engine slot poisoned"))?;
        *slot = engine;
        tracing::info!("engine client replaced");
        Ok(())
    }

    fn engine(&self) -> Result<Arc<dyn EngineClient>> {
        self.engine
            .read()
            .map(|e| Arc::clone(&e))
            .map_err(|_| DodocoError::infra("engine.acquire", "engine slot poisoned"))
    }

    fn load(&self, id: RecordId) -> Result<ContainerRecord> {
        self.store
            .read(|s| s.container(id))?
            .ok_or_else(|| DodocoError::not_found("container", id))
    }

    /// Creates a record, binds its ports, and provisions its instance.
    ///
    /// When the engine rejects the create, the record and its mappings are
    /// discarded again.
    ///
    /// # Errors
    ///
    /// - `Validation`/`BadImage` for a bad request.
    /// - `NotFound`/`NotApproved`/`Forbidden`/`QuotaExceeded` from the
    ///   project guard.
    /// - `Conflict` if the engine name is already in use.
    /// - `Infra` if the engine create fails after one pull.
    pub fn create(&self, requester: Requester, request: &CreateRequest) -> Result<ContainerRecord> {
        if request.name.trim().is_empty() {
            return Err(DodocoError::Validation {
                message: "container name must not be empty".into(),
            });
        }
        let image = self.images.validate(&request.image)?;
        let specs = if request.ports.is_empty() {
            self.images.default_ports(&image.base)?
        } else {
            request.ports.clone()
        };
        let port_requests = PortRequest::from_specs(&specs);
        let new = NewContainer {
            name: request.name.clone(),
            description: request.description.clone(),
            start_image_name: image.reference(),
            engine_container_name: generate_engine_name(&image.base),
            project_id: request.project_id,
            created_by: requester.user_id,
        };

        let record = self.store.write(|s| {
            let _ = ProjectQuotaGuard::authorize(s, request.project_id, requester)?;
            let record = s.insert_container(&new)?;
            let _ = self.ports.bind(s, record.id, &port_requests)?;
            Ok(record)
        })?;
        tracing::info!(
            record = %record.id,
            project = record.project_id,
            engine_name = %record.engine_container_name,
            image = %record.start_image_name,
            "container record created"
        );

        let _guard = self.locks.try_acquire(record.id)?;
        let engine = self.engine()?;
        let engine_id = match self.provision(engine.as_ref(), &record) {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(record = %record.id, error = %err, "provisioning failed, discarding record");
                if let Err(cleanup) = self.store.write(|s| s.delete_container(record.id)) {
                    tracing::warn!(record = %record.id, error = %cleanup, "could not discard record");
                }
                return Err(err);
            }
        };
        if request.start {
            engine
                .start(&engine_id)
                .map_err(|e| e.into_dodoco("engine.start"))?;
            tracing::info!(record = %record.id, engine_id = %engine_id.short(), "container started");
        }
        self.load(record.id)
    }

    /// Creates a backing instance from the record's current image and
    /// points the record at it.
    fn provision(&self, engine: &dyn EngineClient, record: &ContainerRecord) -> Result<EngineId> {
        let mappings = self.store.read(|s| s.ports_of(record.id))?;
        let spec = CreateSpec {
            image: record.current_image(),
            name: record.engine_container_name.clone(),
            network_mode: self.network_mode.clone(),
            ports: mappings
                .iter()
                .map(|m| (m.binding_key(), m.exposed_port))
                .collect(),
            interactive: true,
        };
        let engine_id = create_with_pull(engine, &spec).map_err(|e| {
            if e.is_conflict() {
                e.into_dodoco("engine.create")
            } else {
                DodocoError::infra("engine.create", e.to_string())
            }
        })?;

        if let Err(err) = self
            .store
            .write(|s| s.set_engine_id(record.id, Some(&engine_id)))
        {
            if let Err(e) = engine.remove(&engine_id, true) {
                tracing::warn!(engine_id = %engine_id.short(), error = %e, "orphaned instance left behind");
            }
            return Err(err);
        }
        tracing::info!(
            record = %record.id,
            engine_id = %engine_id.short(),
            image = %spec.image,
            "backing instance created"
        );
        Ok(engine_id)
    }

    /// Starts the container, recreating its instance when it is missing.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record does not exist, `Conflict` if it is busy,
    /// `Infra` on engine failure.
    pub fn start(&self, id: RecordId) -> Result<()> {
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine = self.engine()?;
        self.start_locked(engine.as_ref(), &record)
    }

    fn start_locked(&self, engine: &dyn EngineClient, record: &ContainerRecord) -> Result<()> {
        let engine_id = match &record.engine_container_id {
            Some(current) => match engine.start(current) {
                Ok(()) => {
                    tracing::info!(record = %record.id, engine_id = %current.short(), "container started");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        record = %record.id,
                        engine_id = %current.short(),
                        "backing instance missing, recreating"
                    );
                    self.store.write(|s| s.set_engine_id(record.id, None))?;
                    self.provision(engine, record)?
                }
                Err(e) => return Err(e.into_dodoco("engine.start")),
            },
            None => {
                tracing::info!(record = %record.id, "record unprovisioned, creating instance");
                self.provision(engine, record)?
            }
        };
        engine
            .start(&engine_id)
            .map_err(|e| e.into_dodoco("engine.start"))?;
        tracing::info!(record = %record.id, engine_id = %engine_id.short(), "container started");
        Ok(())
    }

    /// Pauses the running instance.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record has no instance or is busy; engine errors
    /// otherwise.
    pub fn pause(&self, id: RecordId) -> Result<()> {
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine_id = live_id(&record)?;
        self.engine()?
            .pause(&engine_id)
            .map_err(|e| e.into_dodoco("engine.pause"))?;
        tracing::info!(record = %id, "container paused");
        Ok(())
    }

    /// Restarts the instance, waiting up to `timeout` for it to stop.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record has no instance or is busy; engine errors
    /// otherwise.
    pub fn restart(&self, id: RecordId, timeout: Option<Duration>) -> Result<()> {
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine_id = live_id(&record)?;
        self.engine()?
            .restart(&engine_id, timeout.unwrap_or(self.stop_timeout))
            .map_err(|e| e.into_dodoco("engine.restart"))?;
        tracing::info!(record = %id, "container restarted");
        Ok(())
    }

    /// Stops the instance.
    ///
    /// `Immediate` kills it. `GracefulBlocking` signals it and waits up to
    /// `timeout`, reporting a timeout as an error. `GracefulAsync` hands a
    /// graceful stop to a background thread and returns at once; that
    /// thread only logs its outcome.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record has no instance or is busy; `Infra` on
    /// engine failure or timeout.
    pub fn stop(&self, id: RecordId, mode: StopMode, timeout: Option<Duration>) -> Result<()> {
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine_id = live_id(&record)?;
        let engine = self.engine()?;
        let timeout = timeout.unwrap_or(self.stop_timeout);

        match mode {
            StopMode::Immediate => engine
                .kill(&engine_id, "SIGKILL")
                .map_err(|e| e.into_dodoco("engine.kill"))?,
            StopMode::GracefulBlocking => {
                engine
                    .kill(&engine_id, "SIGTERM")
                    .map_err(|e| e.into_dodoco("engine.kill"))?;
                let code = engine
                    .wait(&engine_id, timeout)
                    .map_err(|e| e.into_dodoco("engine.wait"))?;
                tracing::debug!(record = %id, exit_code = code, "instance exited");
            }
            StopMode::GracefulAsync => spawn_stop(engine, engine_id, timeout)?,
        }
        tracing::info!(record = %id, mode = ?mode, "container stop requested");
        Ok(())
    }

    /// Snapshots the instance into `{engine_container_name}:{version + 1}`
    /// and replaces the instance with one created from that image.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record has no instance or is busy; engine errors
    /// otherwise. If the recreate fails the record is left unprovisioned
    /// at the new version. An instance that vanished from the engine is
    /// recreated from the current image without a snapshot.
    pub fn commit(&self, id: RecordId, changes: Option<&str>, start: bool) -> Result<ContainerRecord> {
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine = self.engine()?;
        self.commit_locked(engine.as_ref(), &record, changes, start)
    }

    fn commit_locked(
        &self,
        engine: &dyn EngineClient,
        record: &ContainerRecord,
        changes: Option<&str>,
        start: bool,
    ) -> Result<ContainerRecord> {
        let old = live_id(record)?;
        match halt(engine, &old, self.stop_timeout) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    record = %record.id,
                    engine_id = %old.short(),
                    "backing instance missing, recreating without snapshot"
                );
                self.store.write(|s| s.set_engine_id(record.id, None))?;
                return self.recreate(engine, record.id, start);
            }
            Err(e) => return Err(e.into_dodoco("engine.stop")),
        }

        let version = record.version + 1;
        let target = CommitSpec {
            repository: record.engine_container_name.clone(),
            tag: version.to_string(),
            changes: changes.map(str::to_owned),
        };
        let image_id = engine
            .commit(&old, &target)
            .map_err(|e| e.into_dodoco("engine.commit"))?;
        tracing::info!(
            record = %record.id,
            image = %target.reference(),
            image_id = %image_id,
            "instance committed"
        );

        match engine.remove(&old, true) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into_dodoco("engine.remove")),
        }
        self.store.write(|s| {
            s.set_version(record.id, version)?;
            s.set_engine_id(record.id, None)
        })?;
        self.recreate(engine, record.id, start)
    }

    /// Provisions a fresh instance for an unprovisioned record, optionally
    /// starts it, and returns the reloaded record.
    fn recreate(&self, engine: &dyn EngineClient, id: RecordId, start: bool) -> Result<ContainerRecord> {
        let current = self.load(id)?;
        let new_id = self.provision(engine, &current)?;
        if start {
            engine
                .start(&new_id)
                .map_err(|e| e.into_dodoco("engine.start"))?;
        }
        self.load(id)
    }

    /// Adds a port mapping. `protocol` may be `all`, which binds both TCP
    /// and UDP. A missing `exposed_port` is allocated. If the record has a
    /// backing instance it is committed so the new binding takes effect.
    /// If that fails while the record still points at its old instance,
    /// the new mappings are removed again.
    ///
    /// # Errors
    ///
    /// `Conflict` if the port is already mapped or the host port is taken;
    /// errors from [`Self::commit`] otherwise.
    pub fn add_port_mapping(
        &self,
        id: RecordId,
        container_port: u16,
        protocol: ProtocolSpec,
        exposed_port: Option<u16>,
        start: bool,
    ) -> Result<Vec<PortMapping>> {
        if container_port == 0 {
            return Err(DodocoError::Validation {
                message: "container port must be non-zero".into(),
            });
        }
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let requests = PortRequest::expand(PortSpec::new(container_port, protocol), exposed_port);
        let mappings = self.store.write(|s| self.ports.bind(s, id, &requests))?;
        tracing::info!(record = %id, count = mappings.len(), "port mappings added");

        let applied = self.engine().and_then(|engine| {
            if record.engine_container_id.is_some() {
                self.commit_locked(engine.as_ref(), &record, None, start)
                    .map(|_| ())
            } else if start {
                self.start_locked(engine.as_ref(), &record)
            } else {
                Ok(())
            }
        });
        if let Err(err) = applied {
            self.discard_unapplied(&record, &mappings);
            return Err(err);
        }
        Ok(mappings)
    }

    /// Drops mappings whose recreate never happened. Once the record has
    /// moved off its old instance the mappings belong to the next one and
    /// are kept.
    fn discard_unapplied(&self, before: &ContainerRecord, mappings: &[PortMapping]) {
        let current = match self.store.read(|s| s.container(before.id)) {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(record = %before.id, error = %e, "could not re-read record");
                return;
            }
        };
        if current.engine_container_id != before.engine_container_id {
            return;
        }
        let ids: Vec<i64> = mappings.iter().map(|m| m.id).collect();
        match self.store.write(|s| s.delete_ports(&ids)) {
            Ok(removed) => {
                tracing::warn!(record = %before.id, removed, "port mappings rolled back");
            }
            Err(e) => {
                tracing::error!(record = %before.id, error = %e, "could not roll back port mappings");
            }
        }
    }

    /// Stops and removes the instance, then deletes the record and its
    /// mappings. Destroying a missing record is not an error.
    ///
    /// # Errors
    ///
    /// `Conflict` if the record is busy. `Infra` if the engine refused to
    /// remove the instance; the record is deleted regardless.
    pub fn destroy(&self, id: RecordId, force: bool) -> Result<DestroyOutcome> {
        let _guard = self.locks.try_acquire(id)?;
        let Some(record) = self.store.read(|s| s.container(id))? else {
            tracing::debug!(record = %id, "nothing to destroy");
            return Ok(DestroyOutcome::NotFound);
        };
        let engine = self.engine()?;
        self.destroy_locked(engine.as_ref(), &record, force)
    }

    fn destroy_locked(
        &self,
        engine: &dyn EngineClient,
        record: &ContainerRecord,
        force: bool,
    ) -> Result<DestroyOutcome> {
        let mut removal_error = None;
        if let Some(engine_id) = &record.engine_container_id {
            let stopped = if force {
                engine.kill(engine_id, "SIGKILL")
            } else {
                halt(engine, engine_id, self.stop_timeout)
            };
            match stopped {
                Ok(()) => {}
                Err(e) if e.is_not_found() || e.is_conflict() => {}
                Err(e) => {
                    tracing::warn!(record = %record.id, error = %e, "stop before removal failed");
                }
            }
            match engine.remove(engine_id, true) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(record = %record.id, "instance already gone");
                }
                Err(e) => {
                    tracing::error!(
                        record = %record.id,
                        engine_id = %engine_id.short(),
                        error = %e,
                        "instance removal failed"
                    );
                    removal_error = Some(e);
                }
            }
        }

        let _ = self.store.write(|s| s.delete_container(record.id))?;
        tracing::info!(record = %record.id, "container destroyed");
        match removal_error {
            Some(e) => Err(DodocoError::infra("engine.remove", e.to_string())),
            None => Ok(DestroyOutcome::Destroyed),
        }
    }

    /// Checks the record against the engine. Returns whether the record
    /// still exists afterwards.
    ///
    /// A record without an instance is kept. A record whose instance is
    /// gone is deleted with its mappings.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record does not exist, `Conflict` if it is busy,
    /// `Infra` if the engine cannot be asked. Nothing is deleted on error.
    pub fn reconcile(&self, id: RecordId) -> Result<bool> {
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine = self.engine()?;
        self.reconcile_locked(engine.as_ref(), &record)
    }

    fn reconcile_locked(&self, engine: &dyn EngineClient, record: &ContainerRecord) -> Result<bool> {
        let Some(engine_id) = &record.engine_container_id else {
            return Ok(true);
        };
        match engine.get(engine_id) {
            Ok(instance) => {
                tracing::debug!(record = %record.id, state = %instance.state, "instance present");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    record = %record.id,
                    engine_id = %engine_id.short(),
                    "instance removed out of band, deleting record"
                );
                let _ = self.store.write(|s| s.delete_container(record.id))?;
                Ok(false)
            }
            Err(e) => Err(DodocoError::infra("engine.get", e.to_string())),
        }
    }

    /// Reconciles every record. Busy or unreachable records are reported,
    /// not retried.
    ///
    /// # Errors
    ///
    /// Returns an error only if the record list cannot be read.
    pub fn reconcile_all(&self) -> Result<ReconcileReport> {
        let records = self.store.read(|s| s.containers(None))?;
        let engine = self.engine()?;
        let mut report = ReconcileReport::default();

        for record in records {
            let outcome = self.locks.try_acquire(record.id).and_then(|_guard| {
                match self.store.read(|s| s.container(record.id))? {
                    Some(fresh) => self.reconcile_locked(engine.as_ref(), &fresh),
                    None => Ok(false),
                }
            });
            match outcome {
                Ok(true) => report.kept += 1,
                Ok(false) => report.removed.push(record.id),
                Err(e) => {
                    tracing::warn!(record = %record.id, error = %e, "reconcile failed");
                    report.failed.push(RecordFailure {
                        id: record.id,
                        error: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            kept = report.kept,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "reconciliation sweep finished"
        );
        Ok(report)
    }

    /// Freezes a project and destroys all of its containers.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admins, `NotFound` for an unknown project,
    /// `Conflict` if it is already frozen or deleted. Individual destroy
    /// failures are reported, not returned.
    pub fn freeze_project(&self, requester: Requester, project_id: i64) -> Result<CascadeReport> {
        self.retire_project(requester, project_id, Retire::Freeze)
    }

    /// Marks a project deleted and destroys all of its containers.
    ///
    /// # Errors
    ///
    /// Same as [`Self::freeze_project`], except that frozen projects may
    /// be deleted.
    pub fn delete_project(&self, requester: Requester, project_id: i64) -> Result<CascadeReport> {
        self.retire_project(requester, project_id, Retire::Delete)
    }

    fn retire_project(
        &self,
        requester: Requester,
        project_id: i64,
        how: Retire,
    ) -> Result<CascadeReport> {
        if !requester.is_admin {
            return Err(DodocoError::Forbidden {
                user_id: requester.user_id,
                project_id,
            });
        }
        let marked = self.store.write(|s| match how {
            Retire::Freeze => s.mark_project_frozen(project_id),
            Retire::Delete => s.mark_project_deleted(project_id),
        })?;
        if !marked {
            return Err(match self.store.read(|s| s.project(project_id))? {
                Some(_) => DodocoError::conflict(format!("project {project_id} is already retired")),
                None => DodocoError::not_found("project", project_id),
            });
        }

        let ids: Vec<RecordId> = self
            .store
            .read(|s| s.containers(Some(project_id)))?
            .iter()
            .map(|r| r.id)
            .collect();
        let mut report = CascadeReport {
            project_id,
            destroyed: Vec::new(),
            failed: Vec::new(),
        };
        for id in ids {
            match self.destroy(id, true) {
                Ok(_) => report.destroyed.push(id),
                Err(e) => {
                    tracing::warn!(project = project_id, record = %id, error = %e, "cascade destroy failed");
                    report.failed.push(RecordFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            project = project_id,
            action = ?how,
            destroyed = report.destroyed.len(),
            failed = report.failed.len(),
            "project retired"
        );
        Ok(report)
    }

    /// Runs a command in the running instance.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty command, `Conflict` if the record has no
    /// instance or is busy, engine errors otherwise.
    pub fn exec(&self, id: RecordId, cmd: &[String], demux: bool) -> Result<ExecOutput> {
        if cmd.is_empty() {
            return Err(DodocoError::Validation {
                message: "command must not be empty".into(),
            });
        }
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine_id = live_id(&record)?;
        let output = self
            .engine()?
            .exec_run(&engine_id, cmd, demux)
            .map_err(|e| e.into_dodoco("engine.exec"))?;
        tracing::info!(record = %id, exit_code = output.exit_code, "command executed");
        Ok(output)
    }

    /// Uploads a local file into `dest_dir` inside the instance. Returns
    /// the archive size in bytes.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `Conflict` if the record has no
    /// instance or is busy, engine errors otherwise.
    pub fn push_file(&self, id: RecordId, local: &Path, dest_dir: &str) -> Result<usize> {
        let archive = pack_file(local)?;
        let _guard = self.locks.try_acquire(id)?;
        let record = self.load(id)?;
        let engine_id = live_id(&record)?;
        self.engine()?
            .put_archive(&engine_id, dest_dir, &archive)
            .map_err(|e| e.into_dodoco("engine.put_archive"))?;
        tracing::info!(record = %id, path = %local.display(), dest = dest_dir, "file uploaded");
        Ok(archive.len())
    }

    /// Builds the view of one container.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record does not exist, `Infra` if the engine
    /// cannot be asked.
    pub fn describe(&self, id: RecordId) -> Result<ContainerView> {
        let record = self.load(id)?;
        let engine = self.engine()?;
        self.view_of(engine.as_ref(), &record)
    }

    /// Builds views of all containers, optionally of one project.
    ///
    /// # Errors
    ///
    /// `Infra` if the store or engine cannot be asked.
    pub fn list(&self, project_id: Option<i64>) -> Result<Vec<ContainerView>> {
        let records = self.store.read(|s| s.containers(project_id))?;
        let engine = self.engine()?;
        records
            .iter()
            .map(|r| self.view_of(engine.as_ref(), r))
            .collect()
    }

    fn view_of(&self, engine: &dyn EngineClient, record: &ContainerRecord) -> Result<ContainerView> {
        let (project, ports) = self.store.read(|s| {
            let project = s
                .project(record.project_id)?
                .ok_or_else(|| DodocoError::not_found("project", record.project_id))?;
            Ok((project, s.ports_of(record.id)?))
        })?;
        let state = match &record.engine_container_id {
            None => ContainerState::Unprovisioned,
            Some(engine_id) => match engine.get(engine_id) {
                Ok(instance) => instance.state,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(record = %record.id, "record points at a missing instance");
                    ContainerState::Unprovisioned
                }
                Err(e) => return Err(DodocoError::infra("engine.get", e.to_string())),
            },
        };
        Ok(ContainerView::build(record, &project, &ports, state))
    }
}

fn live_id(record: &ContainerRecord) -> Result<EngineId> {
    record
        .engine_container_id
        .clone()
        .ok_or_else(|| DodocoError::conflict(format!("container {} has no backing instance", record.id)))
}

/// Signals the instance and waits for it to exit, killing it if the wait
/// fails. An instance that is not running counts as halted.
fn halt(engine: &dyn EngineClient, engine_id: &EngineId, timeout: Duration) -> EngineResult<()> {
    let graceful = engine
        .kill(engine_id, "SIGTERM")
        .and_then(|()| engine.wait(engine_id, timeout).map(|_| ()));
    match graceful {
        Ok(()) => Ok(()),
        Err(e) if e.is_conflict() => Ok(()),
        Err(e) if e.is_not_found() => Err(e),
        Err(e) => {
            tracing::warn!(engine_id = %engine_id.short(), error = %e, "graceful stop failed, killing");
            match engine.kill(engine_id, "SIGKILL") {
                Err(k) if k.is_conflict() => Ok(()),
                other => other,
            }
        }
    }
}

fn spawn_stop(engine: Arc<dyn EngineClient>, engine_id: EngineId, timeout: Duration) -> Result<()> {
    let _handle = std::thread::Builder::new()
        .name(format!("dodoco-stop-{}", engine_id.short()))
        .spawn(move || match engine.stop(&engine_id, timeout) {
            Ok(()) => tracing::info!(engine_id = %engine_id.short(), "background stop finished"),
            Err(e) => {
                tracing::warn!(engine_id = %engine_id.short(), error = %e, "background stop failed");
            }
        })
        .map_err(|e| DodocoError::infra("engine.stop", e.to_string()))?;
    Ok(())
}
