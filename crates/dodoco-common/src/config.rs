//! Global configuration model for Dodoco.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DodocoError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DodocoConfig {
    /// Base directory for Dodoco state and data.
    pub data_dir: PathBuf,
    /// Path to the SQLite database.
    pub database_path: PathBuf,
    /// Container engine connection settings.
    pub engine: EngineConfig,
    /// Host port range handed out to port mappings.
    pub ports: PortRange,
    /// Base images that may be provisioned, with their default ports.
    pub images: ImageAllowList,
    /// Default grace period for stop and restart.
    pub default_stop_timeout_secs: u64,
}

impl Default for DodocoConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::data_dir().clone(),
            database_path: constants::default_database_path(),
            engine: EngineConfig::default(),
            ports: PortRange::default(),
            images: ImageAllowList::default(),
            default_stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
        }
    }
}

impl DodocoConfig {
    /// Loads configuration from a JSON file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DodocoError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies engine endpoint overrides from the environment.
    ///
    /// `DODOCO_ENGINE_URL` wins; otherwise a `tcp://` `DOCKER_HOST` is
    /// rewritten to `http://`.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(constants::ENGINE_URL_ENV) {
            self.engine.base_url = url;
        } else if let Ok(host) = std::env::var(constants::DOCKER_HOST_ENV) {
            if let Some(rest) = host.strip_prefix("tcp://") {
                self.engine.base_url = format!("http://{rest}");
            }
        }
        self
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `DodocoError::Validation` for an empty or inverted port
    /// range, an empty image allow-list, or an unparsable default port.
    pub fn validate(&self) -> Result<()> {
        if self.ports.start == 0 || self.ports.start > self.ports.end {
            return Err(DodocoError::Validation {
                message: format!(
                    "invalid port range {}-{}",
                    self.ports.start, self.ports.end
                ),
            });
        }
        if self.images.0.is_empty() {
            return Err(DodocoError::Validation {
                message: "image allow-list is empty".into(),
            });
        }
        for (image, policy) in &self.images.0 {
            for spec in &policy.default_ports {
                let _ = spec
                    .parse::<crate::types::PortSpec>()
                    .map_err(|e| DodocoError::Validation {
                        message: format!("image '{image}': {e}"),
                    })?;
            }
        }
        Ok(())
    }
}

/// Container engine connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP base URL of the engine API.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Network mode every instance is created with.
    pub network_mode: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: constants::DEFAULT_ENGINE_URL.into(),
            request_timeout_secs: constants::DEFAULT_ENGINE_TIMEOUT_SECS,
            network_mode: constants::DEFAULT_NETWORK_MODE.into(),
        }
    }
}

/// Inclusive range of host ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port, inclusive.
    pub start: u16,
    /// Last port, inclusive.
    pub end: u16,
}

impl PortRange {
    /// Number of ports in the range.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.end.saturating_sub(self.start)) + 1
    }

    /// Returns whether the range holds no ports.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Returns whether `port` falls inside the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: constants::EPHEMERAL_PORT_START,
            end: constants::EPHEMERAL_PORT_END,
        }
    }
}

/// Per-image policy entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Port specs (`22/all`, `80/tcp`) applied when a create request names none.
    #[serde(default)]
    pub default_ports: Vec<String>,
}

/// Allow-list of base images keyed by base name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageAllowList(pub BTreeMap<String, ImageEntry>);

impl Default for ImageAllowList {
    fn default() -> Self {
        let mut images = BTreeMap::new();
        let _ = images.insert(
            "ubuntu".to_string(),
            ImageEntry {
                default_ports: vec!["22/all".into()],
            },
        );
        Self(images)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DodocoConfig::default();
        config.validate().expect("default config validates");
        assert_eq!(config.ports.start, 49152);
        assert_eq!(config.ports.end, 65535);
        assert!(config.images.0.contains_key("ubuntu"));
    }

    #[test]
    fn load_fills_missing_keys_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"engine": {{"base_url": "http://docker:2375"}}, "ports": {{"start": 50000, "end": 50010}}}}"#
        )
        .expect("write");

        let config = DodocoConfig::load(file.path()).expect("load");
        assert_eq!(config.engine.base_url, "http://docker:2375");
        assert_eq!(config.engine.network_mode, "bridge");
        assert_eq!(config.ports.len(), 11);
        assert!(config.images.0.contains_key("ubuntu"));
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let config = DodocoConfig {
            ports: PortRange {
                start: 60000,
                end: 50000,
            },
            ..DodocoConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_default_port_is_rejected() {
        let mut config = DodocoConfig::default();
        let _ = config.images.0.insert(
            "debian".into(),
            ImageEntry {
                default_ports: vec!["ssh/all".into()],
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_range_contains_bounds() {
        let range = PortRange {
            start: 10,
            end: 20,
        };
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
        assert!(!range.is_empty());
    }
}
