//! Engine client abstraction.

use std::collections::BTreeMap;
use std::time::Duration;

use dodoco_common::error::DodocoError;
use dodoco_common::types::{ContainerState, EngineId};
use thiserror::Error;

use crate::exec::ExecOutput;

/// Failure reported by an engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The container or image does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Engine-provided description.
        message: String,
    },

    /// The request conflicts with engine state (name in use, not running, ...).
    #[error("conflict: {message}")]
    Conflict {
        /// Engine-provided description.
        message: String,
    },

    /// The call did not complete within its deadline.
    #[error("{operation} timed out")]
    Timeout {
        /// Engine operation that timed out.
        operation: &'static str,
    },

    /// The engine answered with an unexpected status.
    #[error("engine API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Engine-provided description.
        message: String,
    },

    /// The engine could not be reached or answered garbage.
    #[error("engine transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },
}

impl EngineError {
    /// Returns whether the engine reported the target as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns whether the engine reported a state conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Converts into the workspace taxonomy, tagging the failed operation.
    ///
    /// `NotFound` and `Conflict` keep their class; everything else is an
    /// infrastructure failure.
    #[must_use]
    pub fn into_dodoco(self, operation: &'static str) -> DodocoError {
        match self {
            Self::NotFound { message } => DodocoError::NotFound {
                kind: "engine instance",
                id: message,
            },
            Self::Conflict { message } => DodocoError::Conflict { message },
            other => DodocoError::infra(operation, other.to_string()),
        }
    }
}

/// Result alias for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Host port bindings keyed by `"{container_port}/{protocol}"`.
pub type PortBindings = BTreeMap<String, u16>;

/// Parameters of a container create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    /// Image reference (`repo:tag`).
    pub image: String,
    /// Engine-side container name.
    pub name: String,
    /// Network mode, e.g. `bridge`.
    pub network_mode: String,
    /// Published ports.
    pub ports: PortBindings,
    /// Allocate a TTY and keep stdin open (`-dit`).
    pub interactive: bool,
}

/// Parameters of a commit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSpec {
    /// Target repository.
    pub repository: String,
    /// Target tag.
    pub tag: String,
    /// Dockerfile-style instructions applied to the new image.
    pub changes: Option<String>,
}

impl CommitSpec {
    /// Returns the `repository:tag` reference the commit produces.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Snapshot of an engine-side container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInstance {
    /// Engine-assigned identifier.
    pub id: EngineId,
    /// Container name without the leading slash.
    pub name: String,
    /// Image reference the container was created from.
    pub image: String,
    /// Current lifecycle state.
    pub state: ContainerState,
}

/// Synchronous client for a container engine.
///
/// All calls block until the engine answers. Implementations must be
/// shareable across request threads.
pub trait EngineClient: Send + Sync {
    /// Creates a container and returns its identifier.
    ///
    /// # Errors
    ///
    /// `NotFound` if the image is not present locally, `Conflict` if the
    /// name is taken.
    fn create(&self, spec: &CreateSpec) -> EngineResult<EngineId>;

    /// Inspects a container.
    ///
    /// # Errors
    ///
    /// `NotFound` if the container does not exist.
    fn get(&self, id: &EngineId) -> EngineResult<EngineInstance>;

    /// Starts a container. Starting a running container is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or cannot start.
    fn start(&self, id: &EngineId) -> EngineResult<()>;

    /// Pauses a running container.
    ///
    /// # Errors
    ///
    /// `Conflict` if the container is not running.
    fn pause(&self, id: &EngineId) -> EngineResult<()>;

    /// Sends a signal (`SIGKILL`, `SIGTERM`, ...) to a running container.
    ///
    /// # Errors
    ///
    /// `Conflict` if the container is not running.
    fn kill(&self, id: &EngineId, signal: &str) -> EngineResult<()>;

    /// Stops a container, killing it after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or cannot be stopped.
    fn stop(&self, id: &EngineId, timeout: Duration) -> EngineResult<()>;

    /// Waits up to `timeout` for the container to exit and returns its exit
    /// code.
    ///
    /// # Errors
    ///
    /// `Timeout` if the container is still running when the deadline passes.
    fn wait(&self, id: &EngineId, timeout: Duration) -> EngineResult<i64>;

    /// Restarts a container with the given stop grace period.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or cannot restart.
    fn restart(&self, id: &EngineId, timeout: Duration) -> EngineResult<()>;

    /// Removes a container. `force` kills it first if running.
    ///
    /// # Errors
    ///
    /// `NotFound` if the container does not exist.
    fn remove(&self, id: &EngineId, force: bool) -> EngineResult<()>;

    /// Snapshots the container filesystem into a new image and returns the
    /// image identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or the commit fails.
    fn commit(&self, id: &EngineId, spec: &CommitSpec) -> EngineResult<String>;

    /// Pulls an image (`repo:tag`) into the local image store.
    ///
    /// # Errors
    ///
    /// `NotFound` if the registry has no such image.
    fn pull(&self, image: &str) -> EngineResult<()>;

    /// Extracts a tar archive into `dest_path` inside the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container or destination does not exist.
    fn put_archive(&self, id: &EngineId, dest_path: &str, tar: &[u8]) -> EngineResult<()>;

    /// Runs a command inside a running container and collects its output.
    ///
    /// # Errors
    ///
    /// `Conflict` if the container is not running.
    fn exec_run(&self, id: &EngineId, cmd: &[String], demux: bool) -> EngineResult<ExecOutput>;
}

/// Creates a container, pulling the image once if the engine does not have it.
///
/// Only an image-not-found answer triggers the pull; any other failure is
/// returned as-is.
///
/// # Errors
///
/// Returns the create error if it is not image-related, the pull error if
/// the pull fails, or the second create error.
pub fn create_with_pull(engine: &dyn EngineClient, spec: &CreateSpec) -> EngineResult<EngineId> {
    match engine.create(spec) {
        Err(EngineError::NotFound { message }) => {
            tracing::info!(image = %spec.image, reason = %message, "image missing locally, pulling");
            engine.pull(&spec.image)?;
            engine.create(spec)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;

    fn spec(image: &str, name: &str) -> CreateSpec {
        CreateSpec {
            image: image.into(),
            name: name.into(),
            network_mode: "bridge".into(),
            ports: PortBindings::new(),
            interactive: true,
        }
    }

    #[test]
    fn create_with_pull_pulls_missing_image_once() {
        let engine = MemoryEngine::with_registry(["ubuntu:latest"]);
        assert!(!engine.has_image("ubuntu:latest"));

        let id = create_with_pull(&engine, &spec("ubuntu:latest", "a")).expect("create");
        assert!(engine.has_image("ubuntu:latest"));
        assert!(engine.get(&id).is_ok());
        assert_eq!(engine.calls("pull"), 1);
    }

    #[test]
    fn create_with_pull_fails_when_registry_lacks_image() {
        let engine = MemoryEngine::with_registry(["ubuntu:latest"]);
        let err = create_with_pull(&engine, &spec("ubuntu:99.99", "a")).expect_err("missing");
        assert!(err.is_not_found());
        assert_eq!(engine.calls("pull"), 1);
    }

    #[test]
    fn create_with_pull_does_not_pull_on_api_error() {
        let engine = MemoryEngine::with_registry(["ubuntu:latest"]);
        engine.fail_next("create");
        let err = create_with_pull(&engine, &spec("ubuntu:latest", "a")).expect_err("api");
        assert!(matches!(err, EngineError::Api { .. }));
        assert_eq!(engine.calls("pull"), 0);
    }

    #[test]
    fn not_found_maps_to_not_found_kind() {
        let err = EngineError::NotFound {
            message: "abc".into(),
        }
        .into_dodoco("engine.get");
        assert_eq!(err.kind(), dodoco_common::error::ErrorKind::NotFound);
    }

    #[test]
    fn timeout_maps_to_infra() {
        let err = EngineError::Timeout { operation: "wait" }.into_dodoco("engine.wait");
        assert_eq!(err.kind(), dodoco_common::error::ErrorKind::Infra);
    }
}
