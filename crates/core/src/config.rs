use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::api::{DEFAULT_WEB_BASE, Endpoints};
use crate::{Error, Result};

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// Files strictly larger than this go through the resumable chunked path.
pub const DEFAULT_CHUNK_THRESHOLD_BYTES: u64 = 4_000_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ROOT_FOLDER_KEY: &str = "myfiles";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub account: Account,
    #[serde(default)]
    pub endpoints: EndpointSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub mirror: MirrorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub email: String,
    /// Name of the environment variable holding the account password.
    pub password_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub web_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    pub request_timeout_secs: u64,
    pub chunk_threshold_bytes: u64,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSettings {
    pub root_folder_key: String,
    pub folder_name: String,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            email: String::new(),
            password_env: "MIRRORBACK_PASSWORD".to_string(),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            web_base: DEFAULT_WEB_BASE.to_string(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            chunk_threshold_bytes: DEFAULT_CHUNK_THRESHOLD_BYTES,
            temp_dir: None,
        }
    }
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            root_folder_key: DEFAULT_ROOT_FOLDER_KEY.to_string(),
            folder_name: "Backups".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            account: Account::default(),
            endpoints: EndpointSettings::default(),
            transfer: TransferSettings::default(),
            mirror: MirrorSettings::default(),
        }
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;

    let settings = parse_settings(&text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn parse_settings(text: &str) -> std::result::Result<Settings, toml::de::Error> {
    let raw: toml::Value = toml::from_str(text)?;
    let version = raw
        .get("version")
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok());

    match version {
        Some(SETTINGS_SCHEMA_VERSION) | None => {
            let mut text = text.to_string();
            if version.is_none() {
                text = format!("version = {SETTINGS_SCHEMA_VERSION}\n{text}");
            }
            toml::from_str::<Settings>(&text)
        }
        Some(other) => Err(toml::de::Error::custom(format!(
            "unsupported settings schema version: {other} (expected {SETTINGS_SCHEMA_VERSION})"
        ))),
    }
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.version != SETTINGS_SCHEMA_VERSION {
        return Err(Error::InvalidConfig {
            message: format!(
                "settings.version must be {SETTINGS_SCHEMA_VERSION} (got {})",
                settings.version
            ),
        });
    }

    let base = settings.endpoints.web_base.trim();
    if !(base.starts_with("https://") || base.starts_with("http://")) {
        return Err(Error::InvalidConfig {
            message: "endpoints.web_base must be an http(s) url".to_string(),
        });
    }

    if settings.account.password_env.trim().is_empty() {
        return Err(Error::InvalidConfig {
            message: "account.password_env must not be empty".to_string(),
        });
    }

    if settings.transfer.request_timeout_secs == 0 {
        return Err(Error::InvalidConfig {
            message: "transfer.request_timeout_secs must be > 0".to_string(),
        });
    }
    if settings.transfer.chunk_threshold_bytes == 0 {
        return Err(Error::InvalidConfig {
            message: "transfer.chunk_threshold_bytes must be > 0".to_string(),
        });
    }

    if settings.mirror.root_folder_key.trim().is_empty()
        || settings.mirror.folder_name.trim().is_empty()
    {
        return Err(Error::InvalidConfig {
            message: "mirror.root_folder_key and mirror.folder_name must not be empty".to_string(),
        });
    }

    Ok(())
}

/// Runtime configuration of a [`crate::MediaFireClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub email: String,
    pub password: String,
    pub endpoints: Endpoints,
    pub request_timeout: Duration,
    pub chunk_threshold_bytes: u64,
    pub temp_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            endpoints: Endpoints::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            chunk_threshold_bytes: DEFAULT_CHUNK_THRESHOLD_BYTES,
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn from_settings(settings: &Settings, password: impl Into<String>) -> Result<Self> {
        validate_settings(settings)?;
        if settings.account.email.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "account.email must not be empty".to_string(),
            });
        }

        Ok(Self {
            email: settings.account.email.trim().to_string(),
            password: password.into(),
            endpoints: Endpoints::with_base(settings.endpoints.web_base.trim()),
            request_timeout: Duration::from_secs(settings.transfer.request_timeout_secs),
            chunk_threshold_bytes: settings.transfer.chunk_threshold_bytes,
            temp_dir: settings
                .transfer
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        })
    }
}
