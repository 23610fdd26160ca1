//! In-process engine.
//!
//! Mirrors the observable behaviour of a Docker daemon closely enough for
//! the orchestrator: images must be pulled before use, names are unique,
//! pause/kill require a running container, and commits produce images that
//! later creates can use. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use dodoco_common::types::{ContainerState, EngineId};

use crate::client::{
    CommitSpec, CreateSpec, EngineClient, EngineError, EngineInstance, EngineResult, PortBindings,
};
use crate::exec::{ExecOutput, frame, split_stream};

#[derive(Debug, Clone)]
struct Instance {
    name: String,
    image: String,
    state: ContainerState,
    ports: PortBindings,
    uploads: Vec<(String, usize)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    instances: HashMap<String, Instance>,
    images: HashSet<String>,
    registry: HashSet<String>,
    failures: HashSet<&'static str>,
    calls: BTreeMap<&'static str, usize>,
}

/// Engine that keeps all containers and images in memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    /// Creates an engine with no local images and an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine whose registry can serve the given images.
    #[must_use]
    pub fn with_registry<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let engine = Self::new();
        if let Ok(mut state) = engine.state.lock() {
            state.registry = images.into_iter().map(Into::into).collect();
        }
        engine
    }

    /// Makes the next call of `operation` fail with an API error.
    pub fn fail_next(&self, operation: &'static str) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.failures.insert(operation);
        }
    }

    /// Number of times `operation` has been invoked.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Returns whether the image is present locally.
    #[must_use]
    pub fn has_image(&self, image: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.images.contains(image))
            .unwrap_or(false)
    }

    /// Number of containers the engine knows about.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.state.lock().map(|s| s.instances.len()).unwrap_or(0)
    }

    /// Port bindings a container was created with.
    #[must_use]
    pub fn ports_of(&self, id: &EngineId) -> Option<PortBindings> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.instances.get(id.as_str()).map(|i| i.ports.clone()))
    }

    /// Archives uploaded into a container as `(dest_path, size)` pairs.
    #[must_use]
    pub fn uploads_of(&self, id: &EngineId) -> Vec<(String, usize)> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.instances.get(id.as_str()).map(|i| i.uploads.clone()))
            .unwrap_or_default()
    }

    /// Deletes a container behind the orchestrator's back.
    pub fn remove_out_of_band(&self, id: &EngineId) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.instances.remove(id.as_str());
        }
    }

    /// Locks the state, records the call, and consumes an injected failure.
    fn enter(&self, operation: &'static str) -> EngineResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.state.lock().map_err(|_| EngineError::Transport {
            message: "memory engine state poisoned".into(),
        })?;
        *state.calls.entry(operation).or_insert(0) += 1;
        if state.failures.remove(operation) {
            return Err(EngineError::Api {
                status: 500,
                message: format!("injected {operation} failure"),
            });
        }
        Ok(state)
    }
}

fn instance_mut<'a>(state: &'a mut MemoryState, id: &EngineId) -> EngineResult<&'a mut Instance> {
    state
        .instances
        .get_mut(id.as_str())
        .ok_or_else(|| EngineError::NotFound {
            message: format!("no such container: {id}"),
        })
}

fn require_running(instance: &Instance, id: &EngineId) -> EngineResult<()> {
    if instance.state == ContainerState::Running {
        Ok(())
    } else {
        Err(EngineError::Conflict {
            message: format!("container {id} is not running"),
        })
    }
}

impl EngineClient for MemoryEngine {
    fn create(&self, spec: &CreateSpec) -> EngineResult<EngineId> {
        let mut state = self.enter("create")?;
        if !state.images.contains(&spec.image) {
            return Err(EngineError::NotFound {
                message: format!("no such image: {}", spec.image),
            });
        }
        if state.instances.values().any(|i| i.name == spec.name) {
            return Err(EngineError::Conflict {
                message: format!("container name \"/{}\" is already in use", spec.name),
            });
        }
        let id = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let _ = state.instances.insert(
            id.clone(),
            Instance {
                name: spec.name.clone(),
                image: spec.image.clone(),
                state: ContainerState::Created,
                ports: spec.ports.clone(),
                uploads: Vec::new(),
            },
        );
        Ok(EngineId::new(id))
    }

    fn get(&self, id: &EngineId) -> EngineResult<EngineInstance> {
        let mut state = self.enter("get")?;
        let instance = instance_mut(&mut state, id)?;
        Ok(EngineInstance {
            id: id.clone(),
            name: instance.name.clone(),
            image: instance.image.clone(),
            state: instance.state,
        })
    }

    fn start(&self, id: &EngineId) -> EngineResult<()> {
        let mut state = self.enter("start")?;
        let instance = instance_mut(&mut state, id)?;
        if instance.state == ContainerState::Paused {
            return Err(EngineError::Conflict {
                message: format!("cannot start paused container {id}"),
            });
        }
        instance.state = ContainerState::Running;
        Ok(())
    }

    fn pause(&self, id: &EngineId) -> EngineResult<()> {
        let mut state = self.enter("pause")?;
        let instance = instance_mut(&mut state, id)?;
        require_running(instance, id)?;
        instance.state = ContainerState::Paused;
        Ok(())
    }

    fn kill(&self, id: &EngineId, _signal: &str) -> EngineResult<()> {
        let mut state = self.enter("kill")?;
        let instance = instance_mut(&mut state, id)?;
        if !matches!(instance.state, ContainerState::Running | ContainerState::Paused) {
            return Err(EngineError::Conflict {
                message: format!("container {id} is not running"),
            });
        }
        instance.state = ContainerState::Stopped;
        Ok(())
    }

    fn stop(&self, id: &EngineId, _timeout: Duration) -> EngineResult<()> {
        let mut state = self.enter("stop")?;
        let instance = instance_mut(&mut state, id)?;
        if instance.state != ContainerState::Created {
            instance.state = ContainerState::Stopped;
        }
        Ok(())
    }

    fn wait(&self, id: &EngineId, _timeout: Duration) -> EngineResult<i64> {
        let mut state = self.enter("wait")?;
        let instance = instance_mut(&mut state, id)?;
        match instance.state {
            ContainerState::Running | ContainerState::Paused => {
                Err(EngineError::Timeout { operation: "wait" })
            }
            _ => Ok(0),
        }
    }

    fn restart(&self, id: &EngineId, _timeout: Duration) -> EngineResult<()> {
        let mut state = self.enter("restart")?;
        instance_mut(&mut state, id)?.state = ContainerState::Running;
        Ok(())
    }

    fn remove(&self, id: &EngineId, force: bool) -> EngineResult<()> {
        let mut state = self.enter("remove")?;
        let instance = instance_mut(&mut state, id)?;
        if !force && matches!(instance.state, ContainerState::Running | ContainerState::Paused) {
            return Err(EngineError::Conflict {
                message: format!("cannot remove running container {id}"),
            });
        }
        let _ = state.instances.remove(id.as_str());
        Ok(())
    }

    fn commit(&self, id: &EngineId, spec: &CommitSpec) -> EngineResult<String> {
        let mut state = self.enter("commit")?;
        let _ = instance_mut(&mut state, id)?;
        let _ = state.images.insert(spec.reference());
        Ok(format!("sha256:{}", uuid::Uuid::new_v4().simple()))
    }

    fn pull(&self, image: &str) -> EngineResult<()> {
        let mut state = self.enter("pull")?;
        if !state.registry.contains(image) {
            return Err(EngineError::NotFound {
                message: format!("manifest for {image} not found"),
            });
        }
        let _ = state.images.insert(image.to_string());
        Ok(())
    }

    fn put_archive(&self, id: &EngineId, dest_path: &str, tar: &[u8]) -> EngineResult<()> {
        let mut state = self.enter("put_archive")?;
        instance_mut(&mut state, id)?
            .uploads
            .push((dest_path.to_string(), tar.len()));
        Ok(())
    }

    /// `echo` writes its arguments to stdout; any other command writes an
    /// error to stderr and exits with 127.
    fn exec_run(&self, id: &EngineId, cmd: &[String], demux: bool) -> EngineResult<ExecOutput> {
        let mut state = self.enter("exec")?;
        let instance = instance_mut(&mut state, id)?;
        require_running(instance, id)?;

        let (raw, exit_code) = match cmd.split_first() {
            Some((program, args)) if program == "echo" => {
                (frame(1, format!("{}\n", args.join(" ")).as_bytes()), 0)
            }
            Some((program, _)) => (
                frame(2, format!("{program}: command not found\n").as_bytes()),
                127,
            ),
            None => (Vec::new(), 0),
        };
        let (stdout, stderr) = split_stream(&raw, demux);
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }
}
