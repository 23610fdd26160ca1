//! Docker Engine HTTP API client.
//!
//! Speaks the subset of the Docker Engine API the orchestrator needs over
//! plain HTTP (`DOCKER_HOST=tcp://...`). Every call is blocking and bounded
//! by the configured request timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use dodoco_common::config::EngineConfig;
use dodoco_common::types::{ContainerState, EngineId};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::client::{
    CommitSpec, CreateSpec, EngineClient, EngineError, EngineInstance, EngineResult,
};
use crate::exec::{ExecOutput, split_stream};

/// Engine client backed by the Docker Engine HTTP API.
#[derive(Debug, Clone)]
pub struct DockerClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
}

impl DockerClient {
    /// Builds a client for the configured endpoint. No request is made.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the HTTP client cannot be constructed.
    pub fn connect(config: &EngineConfig) -> EngineResult<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Transport {
                message: e.to_string(),
            })?;
        tracing::info!(base_url = %config.base_url, "docker engine client configured");
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    /// Returns the endpoint this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends a request and maps HTTP status to [`EngineError`].
    fn send(&self, operation: &'static str, request: RequestBuilder) -> EngineResult<Response> {
        let response = request.send().map_err(|e| transport(operation, &e))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        let message = error_message(response);
        tracing::debug!(operation, status = status.as_u16(), %message, "engine call failed");
        Err(match status {
            StatusCode::NOT_FOUND => EngineError::NotFound { message },
            StatusCode::CONFLICT => EngineError::Conflict { message },
            _ => EngineError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> EngineResult<T> {
        self.send(operation, request)?
            .json::<T>()
            .map_err(|e| transport(operation, &e))
    }

    /// Extends the request deadline past a grace period the engine honours
    /// server-side.
    fn with_grace(&self, grace: Duration) -> Duration {
        self.request_timeout + grace
    }
}

impl EngineClient for DockerClient {
    fn create(&self, spec: &CreateSpec) -> EngineResult<EngineId> {
        let exposed: BTreeMap<&str, serde_json::Value> =
            spec.ports.keys().map(|k| (k.as_str(), json!({}))).collect();
        let bindings: BTreeMap<&str, serde_json::Value> = spec
            .ports
            .iter()
            .map(|(k, port)| (k.as_str(), json!([{ "HostPort": port.to_string() }])))
            .collect();
        let body = json!({
            "Image": spec.image,
            "Tty": spec.interactive,
            "OpenStdin": spec.interactive,
            "AttachStdin": false,
            "AttachStdout": false,
            "AttachStderr": false,
            "ExposedPorts": exposed,
            "HostConfig": {
                "NetworkMode": spec.network_mode,
                "PortBindings": bindings,
            },
        });
        let created: IdResponse = self.send_json(
            "create",
            self.http
                .post(self.url("/containers/create"))
                .query(&[("name", spec.name.as_str())])
                .json(&body),
        )?;
        tracing::debug!(id = %created.id, name = %spec.name, image = %spec.image, "engine container created");
        Ok(EngineId::new(created.id))
    }

    fn get(&self, id: &EngineId) -> EngineResult<EngineInstance> {
        let inspect: InspectResponse = self.send_json(
            "inspect",
            self.http.get(self.url(&format!("/containers/{id}/json"))),
        )?;
        Ok(EngineInstance {
            id: EngineId::new(inspect.id),
            name: inspect.name.trim_start_matches('/').to_string(),
            image: inspect.config.image,
            state: ContainerState::from_engine_status(&inspect.state.status),
        })
    }

    fn start(&self, id: &EngineId) -> EngineResult<()> {
        let _ = self.send(
            "start",
            self.http.post(self.url(&format!("/containers/{id}/start"))),
        )?;
        Ok(())
    }

    fn pause(&self, id: &EngineId) -> EngineResult<()> {
        let _ = self.send(
            "pause",
            self.http.post(self.url(&format!("/containers/{id}/pause"))),
        )?;
        Ok(())
    }

    fn kill(&self, id: &EngineId, signal: &str) -> EngineResult<()> {
        let _ = self.send(
            "kill",
            self.http
                .post(self.url(&format!("/containers/{id}/kill")))
                .query(&[("signal", signal)]),
        )?;
        Ok(())
    }

    fn stop(&self, id: &EngineId, timeout: Duration) -> EngineResult<()> {
        let _ = self.send(
            "stop",
            self.http
                .post(self.url(&format!("/containers/{id}/stop")))
                .query(&[("t", timeout.as_secs())])
                .timeout(self.with_grace(timeout)),
        )?;
        Ok(())
    }

    fn wait(&self, id: &EngineId, timeout: Duration) -> EngineResult<i64> {
        let waited: WaitResponse = self.send_json(
            "wait",
            self.http
                .post(self.url(&format!("/containers/{id}/wait")))
                .query(&[("condition", "not-running")])
                .timeout(timeout),
        )?;
        Ok(waited.status_code)
    }

    fn restart(&self, id: &EngineId, timeout: Duration) -> EngineResult<()> {
        let _ = self.send(
            "restart",
            self.http
                .post(self.url(&format!("/containers/{id}/restart")))
                .query(&[("t", timeout.as_secs())])
                .timeout(self.with_grace(timeout)),
        )?;
        Ok(())
    }

    fn remove(&self, id: &EngineId, force: bool) -> EngineResult<()> {
        let _ = self.send(
            "remove",
            self.http
                .delete(self.url(&format!("/containers/{id}")))
                .query(&[("force", force)]),
        )?;
        Ok(())
    }

    fn commit(&self, id: &EngineId, spec: &CommitSpec) -> EngineResult<String> {
        let mut query = vec![
            ("container", id.as_str().to_string()),
            ("repo", spec.repository.clone()),
            ("tag", spec.tag.clone()),
        ];
        if let Some(changes) = &spec.changes {
            query.extend(
                changes
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| ("changes", l.to_string())),
            );
        }
        let committed: IdResponse = self.send_json(
            "commit",
            self.http
                .post(self.url("/commit"))
                .query(&query)
                .json(&json!({})),
        )?;
        Ok(committed.id)
    }

    fn pull(&self, image: &str) -> EngineResult<()> {
        let (from_image, tag) = split_reference(image);
        let response = self.send(
            "pull",
            self.http
                .post(self.url("/images/create"))
                .query(&[("fromImage", from_image), ("tag", tag)]),
        )?;
        // Progress is streamed as JSON lines; failures arrive in-band.
        let body = response.text().map_err(|e| transport("pull", &e))?;
        for line in body.lines() {
            if let Ok(progress) = serde_json::from_str::<PullProgress>(line) {
                if let Some(error) = progress.error {
                    return Err(if error.contains("not found") {
                        EngineError::NotFound { message: error }
                    } else {
                        EngineError::Api {
                            status: 200,
                            message: error,
                        }
                    });
                }
            }
        }
        tracing::info!(image, "image pulled");
        Ok(())
    }

    fn put_archive(&self, id: &EngineId, dest_path: &str, tar: &[u8]) -> EngineResult<()> {
        let _ = self.send(
            "put_archive",
            self.http
                .put(self.url(&format!("/containers/{id}/archive")))
                .query(&[("path", dest_path)])
                .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
                .body(tar.to_vec()),
        )?;
        Ok(())
    }

    fn exec_run(&self, id: &EngineId, cmd: &[String], demux: bool) -> EngineResult<ExecOutput> {
        let created: IdResponse = self.send_json(
            "exec",
            self.http
                .post(self.url(&format!("/containers/{id}/exec")))
                .json(&json!({
                    "AttachStdout": true,
                    "AttachStderr": true,
                    "Tty": false,
                    "Cmd": cmd,
                })),
        )?;
        let raw = self
            .send(
                "exec",
                self.http
                    .post(self.url(&format!("/exec/{}/start", created.id)))
                    .json(&json!({ "Detach": false, "Tty": false })),
            )?
            .bytes()
            .map_err(|e| transport("exec", &e))?;
        let inspect: ExecInspect = self.send_json(
            "exec",
            self.http.get(self.url(&format!("/exec/{}/json", created.id))),
        )?;

        let (stdout, stderr) = split_stream(&raw, demux);
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }
}

/// Splits `repo[:tag]` into repository and tag. A `:` inside the registry
/// host (`host:5000/img`) is not a tag separator.
fn split_reference(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

fn transport(operation: &'static str, err: &reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::Timeout { operation }
    } else {
        EngineError::Transport {
            message: format!("{operation}: {err}"),
        }
    }
}

fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ErrorResponse>() {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct WaitResponse {
    #[serde(rename = "StatusCode")]
    status_code: i64,
}

#[derive(Debug, Deserialize)]
struct ExecInspect {
    #[serde(rename = "ExitCode")]
    exit_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PullProgress {
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_trims_trailing_slash() {
        let config = EngineConfig {
            base_url: "http://docker:2375/".into(),
            ..EngineConfig::default()
        };
        let client = DockerClient::connect(&config).expect("connect");
        assert_eq!(client.base_url(), "http://docker:2375");
        assert_eq!(
            client.url("/containers/abc/json"),
            "http://docker:2375/containers/abc/json"
        );
    }

    #[test]
    fn references_split_on_the_tag_only() {
        assert_eq!(split_reference("ubuntu"), ("ubuntu", "latest"));
        assert_eq!(split_reference("ubuntu:20.04"), ("ubuntu", "20.04"));
        assert_eq!(split_reference("host:5000/img"), ("host:5000/img", "latest"));
        assert_eq!(split_reference("host:5000/img:2"), ("host:5000/img", "2"));
    }

    #[test]
    fn inspect_payload_deserializes() {
        let payload = r#"{
            "Id": "f00d",
            "Name": "/ubuntu_abc",
            "Config": {"Image": "ubuntu:latest"},
            "State": {"Status": "paused"}
        }"#;
        let inspect: InspectResponse = serde_json::from_str(payload).expect("parse");
        assert_eq!(inspect.id, "f00d");
        assert_eq!(inspect.name, "/ubuntu_abc");
        assert_eq!(inspect.config.image, "ubuntu:latest");
        assert_eq!(
            ContainerState::from_engine_status(&inspect.state.status),
            ContainerState::Paused
        );
    }

    #[test]
    fn pull_progress_error_deserializes() {
        let line = r#"{"error": "manifest for ubuntu:nope not found"}"#;
        let progress: PullProgress = serde_json::from_str(line).expect("parse");
        assert!(progress.error.is_some());
        let ok: PullProgress = serde_json::from_str(r#"{"status": "Downloading"}"#).expect("parse");
        assert!(ok.error.is_none());
    }

    #[test]
    fn unreachable_engine_is_transport_error() {
        let config = EngineConfig {
            base_url: "http://127.0.0.1:9".into(),
            request_timeout_secs: 2,
            ..EngineConfig::default()
        };
        let client = DockerClient::connect(&config).expect("connect");
        let err = client.get(&EngineId::new("abc")).expect_err("unreachable");
        assert!(matches!(
            err,
            EngineError::Transport { .. } | EngineError::Timeout { .. }
        ));
    }
}
