//! Configuration management for ecoatlas.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::map::{MapView, DEFAULT_ZOOM, TOGO_CENTER};
use crate::report::GeoPoint;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "ecoatlas";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "reports.db";

/// Highest zoom level tile servers provide.
const MAX_ZOOM: u8 = 20;

/// Shown in place of credentials.
pub const REDACTED: &str = "<redacted>";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `ECOATLAS_`, sections split on `__`)
/// 2. TOML config file at `~/.config/ecoatlas/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local queue configuration.
    pub storage: StorageConfig,
    /// Backend configuration.
    pub remote: RemoteConfig,
    /// Synchronization configuration.
    pub sync: SyncConfig,
    /// Map configuration.
    pub map: MapConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the queue database.
    /// Defaults to `~/.local/share/ecoatlas/reports.db`
    pub database_path: Option<PathBuf>,
}

/// Backend-as-a-service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: Option<String>,
    /// Public anon key.
    pub anon_key: Option<String>,
    /// Access token of the signed-in user, if any.
    pub access_token: Option<String>,
    /// User id recorded on submitted observations.
    pub user_id: Option<String>,
    /// Storage bucket for report photos.
    pub bucket: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Synchronization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Send each report's idempotency key so replays cannot duplicate rows.
    pub idempotency_key: bool,
    /// Try to submit a report right after queueing it.
    pub submit_immediately: bool,
}

/// Map configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Initial centre latitude.
    pub center_lat: f64,
    /// Initial centre longitude.
    pub center_lng: f64,
    /// Initial zoom.
    pub zoom: u8,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            access_token: None,
            user_id: None,
            bucket: "observations".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            idempotency_key: true,
            submit_immediately: true,
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center_lat: TOGO_CENTER.0,
            center_lng: TOGO_CENTER.1,
            zoom: DEFAULT_ZOOM,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::figment(config_file).extract::<Config>()?.validated()
    }

    fn figment(config_file: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed("ECOATLAS_").split("__"))
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.remote.url {
            url::Url::parse(url).map_err(|e| Error::ConfigValidation {
                message: format!("remote.url '{url}' is not a valid URL: {e}"),
            })?;
        }

        if self.remote.timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "remote.timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.remote.bucket.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "remote.bucket must not be empty".to_string(),
            });
        }

        if self.map.zoom > MAX_ZOOM {
            return Err(Error::ConfigValidation {
                message: format!("map.zoom ({}) must be at most {MAX_ZOOM}", self.map.zoom),
            });
        }

        GeoPoint::new(self.map.center_lat, self.map.center_lng).map_err(|e| {
            Error::ConfigValidation {
                message: format!("map center: {e}"),
            }
        })?;

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Whether a backend URL and key are configured.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.url.is_some() && self.remote.anon_key.is_some()
    }

    /// A copy safe to print: the anon key and access token are masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        fn mask(secret: &mut Option<String>) {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }

        let mut copy = self.clone();
        mask(&mut copy.remote.anon_key);
        mask(&mut copy.remote.access_token);
        copy
    }

    /// Initial map view from the `[map]` section.
    #[must_use]
    pub fn map_view(&self) -> MapView {
        MapView::new(
            GeoPoint {
                lat: self.map.center_lat,
                lng: self.map.center_lng,
            },
            self.map.zoom,
        )
    }
}
