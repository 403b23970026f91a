//! TOML-based session configuration.
//!
//! ```toml
//! [player]
//! name = "Player"
//! join_password = "letmein"
//!
//! [network]
//! session_port = 28800
//! discovery_port = 28801
//! broadcast_enabled = true
//!
//! [server]
//! name = "LanLink Server"
//! server_type = "cooperative"
//! max_players = 4
//! password = "hunter2"
//!
//! [storage]
//! bookmarks_file = "bookmarks.txt"
//! download_dir = "downloads"
//! ```
//!
//! Every field has a serde default, so a missing file, an empty file, or a
//! file written by an older version all load.  `max_players` is clamped to
//! the registry size when read through [`ServerConfig::max_players`].

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanlink_core::protocol::{ServerOptions, ServerType, MAX_CLIENTS, SESSION_PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    /// Display name sent in JOIN_REQUEST and shown in rosters.
    #[serde(default = "default_player_name")]
    pub name: String,
    /// Password sent when joining someone else's session.  Independent of
    /// `server.password`, which guards this process's own session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// TCP port of the session channel.
    #[serde(default = "default_session_port")]
    pub session_port: u16,
    /// UDP port of the discovery channel.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Local address every socket binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: Ipv4Addr,
    /// When `false` the host never announces itself on the LAN.
    #[serde(default = "default_true")]
    pub broadcast_enabled: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub server_type: ServerType,
    #[serde(default)]
    pub min_level: u8,
    #[serde(default = "default_max_level")]
    pub max_level: u8,
    /// Registry capacity including the host's own slot.
    #[serde(default = "default_max_players", rename = "max_players")]
    pub max_players_raw: u8,
    #[serde(default)]
    pub options: ServerOptions,
    /// Required join password; `None` or empty admits anyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Admit members as soon as their JOIN_REQUEST passes every check.
    #[serde(default = "default_true")]
    pub auto_join: bool,
    /// Version exchanged in JOIN_REQUEST; peers must match exactly.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,
}

impl ServerConfig {
    /// `max_players` clamped to `1..=MAX_CLIENTS`.
    pub fn max_players(&self) -> u8 {
        self.max_players_raw.clamp(1, MAX_CLIENTS as u8)
    }

    /// The configured password, if one is actually set.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_bookmarks_file")]
    pub bookmarks_file: PathBuf,
    #[serde(default = "default_blacklist_file")]
    pub blacklist_file: PathBuf,
    /// Directory that receives incoming file transfers.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_player_name() -> String {
    "Player".to_string()
}
fn default_session_port() -> u16 {
    28800
}
fn default_discovery_port() -> u16 {
    28801
}
fn default_bind_address() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_server_name() -> String {
    "LanLink Server".to_string()
}
fn default_max_level() -> u8 {
    u8::MAX
}
fn default_max_players() -> u8 {
    MAX_CLIENTS as u8
}
fn default_protocol_version() -> u16 {
    SESSION_PROTOCOL_VERSION
}
fn default_bookmarks_file() -> PathBuf {
    PathBuf::from("bookmarks.txt")
}
fn default_blacklist_file() -> PathBuf {
    PathBuf::from("blacklist.txt")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            name: default_player_name(),
            join_password: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            session_port: default_session_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            broadcast_enabled: default_true(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            description: String::new(),
            server_type: ServerType::default(),
            min_level: 0,
            max_level: default_max_level(),
            max_players_raw: default_max_players(),
            options: ServerOptions::default(),
            password: None,
            auto_join: default_true(),
            protocol_version: default_protocol_version(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bookmarks_file: default_bookmarks_file(),
            blacklist_file: default_blacklist_file(),
            download_dir: default_download_dir(),
            log_level: default_log_level(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Platform directory for the default config file, if one can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanLink").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanlink").join("config.toml"))
    }
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
pub fn save_config(path: &Path, config: &SessionConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_ports() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.network.session_port, 28800);
        assert_eq!(cfg.network.discovery_port, 28801);
        assert!(cfg.network.broadcast_enabled);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: SessionConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn test_partial_server_section_overrides_defaults() {
        // Arrange
        let text = "[server]\nmax_players = 4\nserver_type = \"roleplay\"\npassword = \"pw\"\n";

        // Act
        let cfg: SessionConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.server.max_players(), 4);
        assert_eq!(cfg.server.server_type, ServerType::Roleplay);
        assert_eq!(cfg.server.password(), Some("pw"));
        assert!(cfg.server.auto_join);
        assert_eq!(cfg.network.session_port, 28800);
    }

    #[test]
    fn test_max_players_is_clamped_to_registry_size() {
        let mut server = ServerConfig::default();
        server.max_players_raw = 40;
        assert_eq!(server.max_players(), 8);
        server.max_players_raw = 0;
        assert_eq!(server.max_players(), 1);
    }

    #[test]
    fn test_empty_password_means_no_password() {
        let mut server = ServerConfig::default();
        server.password = Some(String::new());
        assert_eq!(server.password(), None);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<SessionConfig, _> = toml::from_str("[network\nsession_port = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = std::env::temp_dir()
            .join(format!("lanlink_test_{}", Uuid::new_v4()))
            .join("config.toml");
        assert_eq!(load_config(&path).unwrap(), SessionConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("lanlink_test_{}", Uuid::new_v4()));
        let path = dir.join("config.toml");
        let mut cfg = SessionConfig::default();
        cfg.player.name = "Ada".to_string();
        cfg.server.options = ServerOptions(ServerOptions::FRIENDLY_FIRE);

        // Act
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_join_password_is_separate_from_host_password() {
        // Arrange
        let text = "[player]\njoin_password = \"theirs\"\n\n[server]\npassword = \"mine\"\n";

        // Act
        let cfg: SessionConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.player.join_password.as_deref(), Some("theirs"));
        assert_eq!(cfg.server.password(), Some("mine"));
        assert_eq!(SessionConfig::default().player.join_password, None);
    }
}
