//! Configuration management for railsweep.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{BoundingBox, DelayRange};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
///
/// This is loaded from `~/.config/railsweep/config.toml` (or platform equivalent)
/// unless an explicit path is given. Missing sections fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sweep geometry, pacing and merge settings
    pub sweep: SweepConfig,
    /// Remote endpoint settings
    pub remote: RemoteConfig,
    /// How credentials are obtained
    pub auth: AuthConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Output artifact settings
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration (default location or `path`) with environment variable overrides.
    ///
    /// See [`AppConfig::apply_env_overrides`] for the supported variables.
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Supports the following variables:
    /// - `TRAINFINDER_USERNAME` / `TRAINFINDER_PASSWORD`: login credentials
    /// - `RAILSWEEP_COOKIE`: a pre-obtained auth cookie value
    /// - `RAILSWEEP_OUTPUT`: output file path
    /// - `RAILSWEEP_MODE`: `single` or `loop`
    /// - `HTTP_PROXY_URL`: proxy for viewport requests
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(username) = non_empty("TRAINFINDER_USERNAME") {
            self.auth.username = Some(username.trim().to_string());
            tracing::debug!("Override auth.username from env");
        }

        if let Some(password) = non_empty("TRAINFINDER_PASSWORD") {
            self.auth.password = Some(password.trim().to_string());
            tracing::debug!("Override auth.password from env");
        }

        if let Some(cookie) = non_empty("RAILSWEEP_COOKIE") {
            self.auth.cookie = Some(cookie.trim().to_string());
            tracing::debug!("Override auth.cookie from env");
        }

        if let Some(output) = non_empty("RAILSWEEP_OUTPUT") {
            tracing::debug!("Override output.path from env: {}", output);
            self.output.path = PathBuf::from(output);
        }

        if let Some(mode) = non_empty("RAILSWEEP_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "single" => self.sweep.mode = SweepMode::Single,
                "loop" => self.sweep.mode = SweepMode::Loop,
                other => tracing::warn!("Ignoring unknown RAILSWEEP_MODE '{}'", other),
            }
        }

        if let Some(proxy) = non_empty("HTTP_PROXY_URL") {
            self.remote.proxy_url = Some(proxy);
            tracing::debug!("Override remote.proxy_url from env");
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        self.sweep
            .bbox
            .validate()
            .map_err(|e| ConfigError::invalid("sweep.bbox", e.to_string()))?;

        if !self.sweep.tile_size_deg.is_finite() || self.sweep.tile_size_deg <= 0.0 {
            return Err(ConfigError::invalid(
                "sweep.tile_size_deg",
                format!("must be a positive number, got {}", self.sweep.tile_size_deg),
            ));
        }

        self.sweep
            .pacing
            .validate()
            .map_err(|e| ConfigError::invalid("sweep.pacing", e.to_string()))?;
        self.sweep
            .loop_delay
            .validate()
            .map_err(|e| ConfigError::invalid("sweep.loop_delay", e.to_string()))?;

        if self.sweep.identity_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "sweep.identity_fields",
                "at least one identity field name is required",
            ));
        }

        if self.remote.auth_cookie_name.trim().is_empty() {
            return Err(ConfigError::invalid(
                "remote.auth_cookie_name",
                "must not be empty",
            ));
        }

        if self.auth.strategy == LoginStrategy::CookieFile && self.auth.cookie_file.is_none() {
            return Err(ConfigError::invalid(
                "auth.cookie_file",
                "required when auth.strategy = \"cookie_file\"",
            ));
        }

        Ok(())
    }

    /// Serialize and write the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        tracing::debug!("Saving config to {}", path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/railsweep/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "railsweep", "railsweep").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the cache directory path, used for the default cookie file.
    ///
    /// Uses XDG base directories: `~/.cache/railsweep`
    pub fn cache_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "railsweep", "railsweep").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.cache_dir().to_path_buf())
    }
}

/// Whether the binary runs one sweep or sweeps continuously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Run a single sweep and exit
    #[default]
    Single,
    /// Sweep repeatedly with a randomized pause in between
    Loop,
}

/// How a parseable but entirely null/empty viewport response is classified.
///
/// Such a response cannot be told apart from a tile with no trains in it, so
/// the choice is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPayloadPolicy {
    /// Treat as expired only for the first tile of a sweep
    #[default]
    FirstTile,
    /// Always treat as a legitimately empty tile
    Never,
    /// Always treat as an expired session
    Always,
}

/// Sweep geometry, pacing and merge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Region to sweep
    pub bbox: BoundingBox,
    /// Nominal tile edge length in degrees
    pub tile_size_deg: f64,
    /// Zoom level sent with each viewport query
    pub zoom: u8,
    /// Randomized delay between consecutive tile requests
    pub pacing: DelayRange,
    /// Single sweep or continuous loop
    pub mode: SweepMode,
    /// Randomized delay between sweeps in loop mode
    pub loop_delay: DelayRange,
    /// Entity identity fields, tried in priority order
    pub identity_fields: Vec<String>,
    /// Categories pre-created in the aggregate, in output order
    pub known_categories: Vec<String>,
    /// Classification of all-null responses
    pub empty_payload_policy: EmptyPayloadPolicy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            bbox: BoundingBox::AUSTRALIA,
            tile_size_deg: 2.5,
            zoom: 7,
            pacing: DelayRange {
                min_ms: 800,
                max_ms: 2500,
            },
            mode: SweepMode::Single,
            loop_delay: DelayRange {
                min_ms: 30_000,
                max_ms: 90_000,
            },
            identity_fields: vec!["id".to_string(), "vehicleId".to_string()],
            known_categories: [
                "favs", "alerts", "places", "tts", "webcams", "atcsGomi", "atcsObj", "trains",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            empty_payload_policy: EmptyPayloadPolicy::FirstTile,
        }
    }
}

/// Remote endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Scheme and host of the tracking site
    pub base_url: String,
    /// Path of the login page
    pub login_path: String,
    /// Path of the viewport data endpoint
    pub viewport_path: String,
    /// Name of the auth cookie that carries the session
    pub auth_cookie_name: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// User agent for plain HTTP requests
    pub user_agent: String,
    /// Optional HTTP proxy URL
    pub proxy_url: Option<String>,
}

impl RemoteConfig {
    /// Absolute login page URL.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.login_path)
    }

    /// Absolute viewport endpoint URL.
    #[must_use]
    pub fn viewport_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.viewport_path
        )
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://trainfinder.otenko.com".to_string(),
            login_path: "/Home/NextLevel".to_string(),
            viewport_path: "/Home/GetViewPortData".to_string(),
            auth_cookie_name: ".ASPXAUTH".to_string(),
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            proxy_url: None,
        }
    }
}

/// Login strategy used to obtain a fresh credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStrategy {
    /// POST the login form with the anti-forgery token
    #[default]
    Form,
    /// Drive a headless browser through the login dialog
    Browser,
    /// Re-read an externally managed cookie file
    CookieFile,
}

/// Credential settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Login strategy
    pub strategy: LoginStrategy,
    /// Account username
    pub username: Option<String>,
    /// Account password (environment only, never stored in the config file)
    #[serde(skip)]
    pub password: Option<String>,
    /// Pre-obtained cookie value (environment only)
    #[serde(skip)]
    pub cookie: Option<String>,
    /// Cookie file read by the `cookie_file` strategy and written after each login
    pub cookie_file: Option<PathBuf>,
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Where to save a screenshot and the page HTML when a login fails
    pub debug_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 900,
            navigation_timeout_secs: 45,
            debug_dir: None,
        }
    }
}

/// Output artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path of the JSON document
    pub path: PathBuf,
    /// Pretty-print the document
    pub pretty: bool,
    /// Leave the previous document in place after a failed or empty sweep
    pub keep_last_good: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trains.json"),
            pretty: true,
            keep_last_good: true,
        }
    }
}
