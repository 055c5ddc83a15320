//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TANDEM_*)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tandem_core::{FileStorage, DEFAULT_STORAGE_KEY};
use tandem_transport::ReconnectConfig;

use crate::dispatcher::WireFormat;
use crate::rest::RestClient;
use crate::session::connection_url;

/// Default server for local development.
pub const LOCAL_BASE_URL: &str = "ws://localhost:8080";

/// Default production server.
pub const PROD_BASE_URL: &str = "wss://multiplayer-server.zeusdev.io";

/// Default REST endpoint for local development.
pub const LOCAL_REST_URL: &str = "http://localhost:3003";

/// Default production REST endpoint.
pub const PROD_REST_URL: &str = "https://multiplayer.zeusdev.io";

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server selection.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session identity.
    #[serde(default)]
    pub session: SessionConfig,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// State persistence.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// REST helper configuration.
    #[serde(default)]
    pub rest: RestConfig,
}

/// Server selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Connect to the local server instead of production.
    #[serde(default = "default_local")]
    pub local: bool,

    /// Base URL used when `local` is set.
    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,

    /// Base URL used otherwise.
    #[serde(default = "default_prod_base_url")]
    pub prod_base_url: String,

    /// Subprotocols offered during the handshake.
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Outbound encoding.
    #[serde(default)]
    pub format: WireFormat,
}

/// Session identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Document to join.
    #[serde(default = "default_document_id")]
    pub document_id: String,

    /// Access token presented in the connection URL.
    #[serde(default = "default_access_token")]
    pub access_token: String,

    /// Local user ID.
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

/// State persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Persist state across runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the slot file.
    #[serde(default = "default_storage_dir")]
    pub dir: String,

    /// Slot name.
    #[serde(default = "default_storage_key")]
    pub key: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// REST helper configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestConfig {
    /// Explicit endpoint, overriding the local/production default.
    #[serde(default)]
    pub base_url: Option<String>,
}

// Default value functions
fn default_local() -> bool {
    std::env::var("TANDEM_LOCAL")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn default_local_base_url() -> String {
    LOCAL_BASE_URL.to_string()
}

fn default_prod_base_url() -> String {
    PROD_BASE_URL.to_string()
}

fn default_document_id() -> String {
    std::env::var("TANDEM_DOCUMENT_ID").unwrap_or_default()
}

fn default_access_token() -> String {
    std::env::var("TANDEM_ACCESS_TOKEN").unwrap_or_default()
}

fn default_user_id() -> String {
    std::env::var("TANDEM_USER_ID").unwrap_or_default()
}

fn default_true() -> bool {
    true
}

fn default_storage_dir() -> String {
    "~/.local/share/tandem".to_string()
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            local: default_local(),
            local_base_url: default_local_base_url(),
            prod_base_url: default_prod_base_url(),
            protocols: Vec::new(),
            format: WireFormat::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            document_id: default_document_id(),
            access_token: default_access_token(),
            user_id: default_user_id(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_storage_dir(),
            key: default_storage_key(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl ServerConfig {
    /// Base URL selected by the `local` flag.
    #[must_use]
    pub fn base_url(&self) -> &str {
        if self.local {
            &self.local_base_url
        } else {
            &self.prod_base_url
        }
    }
}

impl StorageConfig {
    /// Path of the slot file, with `~` expanded.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        let dir = shellexpand::tilde(&self.dir);
        Path::new(dir.as_ref()).join(format!("{}.json", self.key))
    }

    /// Storage for the configured slot.
    #[must_use]
    pub fn file_storage(&self) -> FileStorage {
        FileStorage::new(self.path())
    }
}

impl RestConfig {
    /// Endpoint to use, given whether the client targets the local server.
    #[must_use]
    pub fn base_url(&self, local: bool) -> &str {
        match &self.base_url {
            Some(url) => url.as_str(),
            None if local => LOCAL_REST_URL,
            None => PROD_REST_URL,
        }
    }
}

impl ClientConfig {
    /// REST client for the configured endpoint.
    #[must_use]
    pub fn rest_client(&self) -> RestClient {
        RestClient::new(self.rest.base_url(self.server.local))
    }

    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "tandem.toml",
            "/etc/tandem/tandem.toml",
            "~/.config/tandem/tandem.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// URL of the multiplayer endpoint for the configured session.
    ///
    /// # Errors
    ///
    /// Returns an error if the document ID or access token is missing.
    pub fn connection_url(&self) -> Result<String> {
        if self.session.document_id.is_empty() {
            bail!("No document to join: set session.document_id or TANDEM_DOCUMENT_ID");
        }
        if self.session.access_token.is_empty() {
            bail!("No access token: set session.access_token or TANDEM_ACCESS_TOKEN");
        }

        Ok(connection_url(
            self.server.base_url(),
            &self.session.document_id,
            &self.session.access_token,
        ))
    }
}
