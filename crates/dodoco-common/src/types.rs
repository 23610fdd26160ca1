//! Domain primitive types used across the Dodoco workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DodocoError, Result};

/// Surrogate identifier of a persisted container record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wraps a raw store identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw store identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the engine assigned to a backing instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    /// Creates an engine ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character short form used in logs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates the engine-side container name for a new record.
///
/// The name is `{base_image}_{32 hex chars}` and never changes for the
/// lifetime of the record.
#[must_use]
pub fn generate_engine_name(base_image: &str) -> String {
    format!("{base_image}_{}", uuid::Uuid::new_v4().simple())
}

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// Stream control transport.
    Stcp,
}

impl Protocol {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Stcp => "stcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = DodocoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "stcp" => Ok(Self::Stcp),
            other => Err(DodocoError::Validation {
                message: format!("unknown port protocol '{other}'"),
            }),
        }
    }
}

/// Protocol selector of a requested port, where `all` fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolSpec {
    /// A single protocol.
    One(Protocol),
    /// One mapping per TCP and UDP.
    All,
}

impl ProtocolSpec {
    /// Expands the selector into the concrete protocols it names.
    #[must_use]
    pub fn expand(self) -> Vec<Protocol> {
        match self {
            Self::One(p) => vec![p],
            Self::All => vec![Protocol::Tcp, Protocol::Udp],
        }
    }
}

impl FromStr for ProtocolSpec {
    type Err = DodocoError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::One)
        }
    }
}

/// A requested container port, e.g. `22/all` or `8080/tcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    /// Port as seen inside the sandbox.
    pub container_port: u16,
    /// Protocol selector.
    pub protocol: ProtocolSpec,
}

impl PortSpec {
    /// Creates a port spec.
    #[must_use]
    pub const fn new(container_port: u16, protocol: ProtocolSpec) -> Self {
        Self {
            container_port,
            protocol,
        }
    }
}

impl FromStr for PortSpec {
    type Err = DodocoError;

    /// Parses `PORT[/PROTO]`, defaulting the protocol to TCP.
    fn from_str(s: &str) -> Result<Self> {
        let (port, proto) = s.split_once('/').unwrap_or((s, "tcp"));
        let container_port = port.trim().parse::<u16>().map_err(|_| DodocoError::Validation {
            message: format!("invalid container port in '{s}'"),
        })?;
        if container_port == 0 {
            return Err(DodocoError::Validation {
                message: format!("container port must be non-zero in '{s}'"),
            });
        }
        Ok(Self {
            container_port,
            protocol: proto.parse()?,
        })
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            ProtocolSpec::One(p) => write!(f, "{}/{p}", self.container_port),
            ProtocolSpec::All => write!(f, "{}/all", self.container_port),
        }
    }
}

/// How a running instance should be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopMode {
    /// Kill without grace period.
    Immediate,
    /// Signal and wait up to the timeout for exit; a timeout is an error.
    GracefulBlocking,
    /// Signal stop with the timeout in the background and return.
    GracefulAsync,
}

impl FromStr for StopMode {
    type Err = DodocoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "immediate" | "kill" => Ok(Self::Immediate),
            "graceful-blocking" | "blocking" => Ok(Self::GracefulBlocking),
            "graceful-async" | "async" => Ok(Self::GracefulAsync),
            other => Err(DodocoError::Validation {
                message: format!("unknown stop mode '{other}'"),
            }),
        }
    }
}

/// Lifecycle state of a container record as observed through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// The record has no backing instance.
    Unprovisioned,
    /// The backing instance exists but was never started.
    Created,
    /// The backing instance is running.
    Running,
    /// The backing instance is paused.
    Paused,
    /// The backing instance has exited.
    Stopped,
}

impl ContainerState {
    /// Maps the engine's status string (`created`, `running`, `exited`, ...).
    #[must_use]
    pub fn from_engine_status(status: &str) -> Self {
        match status {
            "running" | "restarting" => Self::Running,
            "paused" => Self::Paused,
            "created" => Self::Created,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprovisioned => write!(f, "unprovisioned"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// User identifier.
    pub user_id: i64,
    /// Whether the user holds the admin role.
    pub is_admin: bool,
}

impl Requester {
    /// A regular, non-admin user.
    #[must_use]
    pub const fn user(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    /// An administrator.
    #[must_use]
    pub const fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_name_has_base_and_hex_suffix() {
        let name = generate_engine_name("ubuntu");
        let (base, suffix) = name.split_once('_').expect("separator");
        assert_eq!(base, "ubuntu");
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn engine_names_do_not_repeat() {
        assert_ne!(generate_engine_name("ubuntu"), generate_engine_name("ubuntu"));
    }

    #[test]
    fn port_spec_parses_all() {
        let spec: PortSpec = "22/all".parse().expect("parse");
        assert_eq!(spec.container_port, 22);
        assert_eq!(spec.protocol, ProtocolSpec::All);
        assert_eq!(spec.protocol.expand(), vec![Protocol::Tcp, Protocol::Udp]);
    }

    #[test]
    fn port_spec_defaults_to_tcp() {
        let spec: PortSpec = "8080".parse().expect("parse");
        assert_eq!(spec.protocol, ProtocolSpec::One(Protocol::Tcp));
        assert_eq!(spec.to_string(), "8080/tcp");
    }

    #[test]
    fn port_spec_rejects_garbage() {
        assert!("abc/tcp".parse::<PortSpec>().is_err());
        assert!("0/tcp".parse::<PortSpec>().is_err());
        assert!("22/icmp".parse::<PortSpec>().is_err());
    }

    #[test]
    fn engine_status_maps_to_state() {
        assert_eq!(ContainerState::from_engine_status("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_engine_status("paused"), ContainerState::Paused);
        assert_eq!(ContainerState::from_engine_status("exited"), ContainerState::Stopped);
        assert_eq!(ContainerState::from_engine_status("created"), ContainerState::Created);
    }

    #[test]
    fn engine_id_short_form() {
        let id = EngineId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(EngineId::new("abc").short(), "abc");
    }
}
