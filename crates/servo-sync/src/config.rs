//! # Panel Configuration
//!
//! Configuration for the operator panel and its controller link.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SERVO_CONTROLLER_URL=ws://robot.local:5000/ws                      │
//! │     SERVO_BOUNDS_POLICY=reject                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/servo-panel/panel.toml (Linux)                           │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     localhost controller, clamp policy, generated client id            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # panel.toml
//! [client]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Bench Panel"
//!
//! [controller]
//! url = "ws://127.0.0.1:5000/ws"
//! connect_timeout_secs = 10
//! initial_backoff_ms = 500
//! max_backoff_secs = 30
//! max_retries = 0
//! ping_interval_secs = 30
//!
//! [control]
//! bounds_policy = "clamp"   # clamp | reject | advisory
//!
//! [storage]
//! db_path = "/var/lib/servo-panel/presets.db"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use servo_core::BoundsPolicy;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Client
// =============================================================================

/// Identity of this panel instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Unique client identifier (auto-generated if not set).
    #[serde(default = "default_client_id")]
    pub id: String,

    #[serde(default = "default_client_name")]
    pub name: String,
}

fn default_client_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_client_name() -> String {
    "Servo Panel".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            id: default_client_id(),
            name: default_client_name(),
        }
    }
}

// =============================================================================
// Controller Link
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// WebSocket URL of the controller.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:5000/ws".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    0 // Infinite
}
fn default_ping_interval() -> u64 {
    30
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            url: default_url(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: default_max_retries(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

// =============================================================================
// Control & Storage
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlSettings {
    /// How out-of-range angles are treated before they are sent.
    #[serde(default)]
    pub bounds_policy: BoundsPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file holding presets. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

// =============================================================================
// Main Panel Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub controller: ControllerSettings,

    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl PanelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (panel.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading panel config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load panel config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Panel config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.client.id.is_empty() {
            return Err(SyncError::InvalidConfig("client.id must not be empty".into()));
        }
        if self.client.name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("client.name must not be empty".into()));
        }

        let url = url::Url::parse(&self.controller.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidUrl(format!(
                "Controller URL must start with ws:// or wss://, got: {}",
                self.controller.url
            )));
        }

        let controller = &self.controller;
        if controller.connect_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }
        if controller.initial_backoff_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }
        if controller.max_backoff_secs.saturating_mul(1000) < controller.initial_backoff_ms {
            return Err(SyncError::InvalidConfig(
                "max_backoff_secs must not be shorter than initial_backoff_ms".into(),
            ));
        }
        if controller.ping_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "ping_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `SERVO_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SERVO_CONTROLLER_URL") {
            debug!(url = %url, "Overriding controller URL from environment");
            self.controller.url = url;
        }

        if let Some(policy) = lookup("SERVO_BOUNDS_POLICY") {
            match policy.parse::<BoundsPolicy>() {
                Ok(parsed) => {
                    debug!(policy = %parsed, "Overriding bounds policy from environment");
                    self.control.bounds_policy = parsed;
                }
                Err(_) => warn!(policy = %policy, "Unknown bounds policy in environment"),
            }
        }

        if let Some(path) = lookup("SERVO_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }

        if let Some(name) = lookup("SERVO_CLIENT_NAME") {
            self.client.name = name;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "servo", "panel")
            .map(|dirs| dirs.config_dir().join("panel.toml"))
    }

    fn default_db_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "servo", "panel")
            .map(|dirs| dirs.data_dir().join("presets.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn client_id(&self) -> &str {
        &self.client.id
    }

    pub fn controller_url(&self) -> &str {
        &self.controller.url
    }

    pub fn bounds_policy(&self) -> BoundsPolicy {
        self.control.bounds_policy
    }

    /// Configured preset database, else the platform default.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.storage.db_path.clone().or_else(Self::default_db_path)
    }
}
