//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Dodoco data when `$HOME` is unusable.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/dodoco";

/// Returns the data directory, preferring `$HOME/.dodoco`,
/// falling back to `/var/lib/dodoco`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".dodoco");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the default SQLite database path.
pub fn default_database_path() -> PathBuf {
    data_dir().join("dodoco.sqlite3")
}

/// Default engine endpoint (Docker daemon exposed over TCP).
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:2375";

/// Environment variable that overrides the engine endpoint.
pub const ENGINE_URL_ENV: &str = "DODOCO_ENGINE_URL";

/// Docker's own endpoint variable, honoured when it uses `tcp://`.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Network every backing instance joins.
pub const DEFAULT_NETWORK_MODE: &str = "bridge";

/// Per-request timeout for engine calls, in seconds. Image pulls may be slow.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 300;

/// Grace period for stop and restart, in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// First port of the IANA ephemeral range.
pub const EPHEMERAL_PORT_START: u16 = 49152;

/// Last port of the IANA ephemeral range.
pub const EPHEMERAL_PORT_END: u16 = 65535;

/// Random draws the allocator makes before falling back to a sweep.
pub const PORT_RANDOM_ATTEMPTS: usize = 64;

/// Times an insert is retried after losing a port uniqueness race.
pub const PORT_INSERT_RETRIES: usize = 8;

/// Tag assumed when an image reference carries none.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Application name used in CLI output.
pub const APP_NAME: &str = "dodoco";
