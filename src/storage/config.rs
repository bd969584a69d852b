//! Configuration file loading and resolution.
//!
//! Loads configuration from:
//! - Linux: `~/.config/fleetwatch/config.toml`
//! - macOS: `~/Library/Application Support/io.fleetwatch.fleetwatch/config.toml`
//! - Windows: `%APPDATA%/fleetwatch/config/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `FLEETWATCH_CONFIG`: Override config file path
//! - `FLEETWATCH_BASE_URL`: API base URL
//! - `FLEETWATCH_VEHICLES`: Comma-separated vehicle ids
//! - `FLEETWATCH_INTERVAL`: Seconds between cycles
//! - `FLEETWATCH_DB`: History database path
//! - `FLEETWATCH_TOKEN_FILE`: Saved token path
//! - `FLEETWATCH_ACCESS_TOKEN`: Fixed bearer token (skips the login helper)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::cli::args::{Cli, PollArgs};
use crate::core::models::VehicleId;
use crate::core::poller::PollerSettings;
use crate::error::{FleetError, Result};
use crate::storage::credentials::CredentialStore;

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const ENV_CONFIG: &str = "FLEETWATCH_CONFIG";
pub const ENV_BASE_URL: &str = "FLEETWATCH_BASE_URL";
pub const ENV_VEHICLES: &str = "FLEETWATCH_VEHICLES";
pub const ENV_INTERVAL: &str = "FLEETWATCH_INTERVAL";
pub const ENV_DB: &str = "FLEETWATCH_DB";
pub const ENV_TOKEN_FILE: &str = "FLEETWATCH_TOKEN_FILE";
pub const ENV_ACCESS_TOKEN: &str = "FLEETWATCH_ACCESS_TOKEN";

/// Upper bound for `polling.max_concurrency`.
pub const MAX_CONCURRENCY: usize = 32;

/// Upper bound for `auth.validity_hours` (one year).
pub const MAX_VALIDITY_HOURS: i64 = 24 * 365;

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Values given on the command line, separated from clap types so resolution
/// can be tested directly.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
    pub vehicles: Vec<VehicleId>,
    pub interval: Option<u64>,
    pub base_url: Option<String>,
}

impl CliOverrides {
    #[must_use]
    pub fn from_cli(cli: &Cli, poll: Option<&PollArgs>) -> Self {
        Self {
            config: cli.config.clone(),
            db: cli.db.clone(),
            token_file: cli.token_file.clone(),
            vehicles: poll.map(|p| p.vehicles.clone()).unwrap_or_default(),
            interval: poll.and_then(|p| p.interval),
            base_url: poll.and_then(|p| p.base_url.clone()),
        }
    }
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub login_url: Option<String>,
    pub request_timeout: Duration,
    pub vehicles: Vec<VehicleId>,
    pub interval: Duration,
    pub vehicle_delay: Duration,
    pub max_concurrency: usize,
    pub database_path: PathBuf,
    pub credential_path: PathBuf,
    pub login_command: Option<String>,
    pub login_args: Vec<String>,
    pub login_timeout: Duration,
    pub validity: TimeDelta,
    /// Fixed token from the environment; selects the static acquirer.
    pub static_token: Option<String>,
    /// Config file that was consulted (it may not exist).
    pub config_path: PathBuf,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

/// Tracks the source of each overridable value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigSources {
    pub base_url: ConfigSource,
    pub vehicles: ConfigSource,
    pub interval: ConfigSource,
    pub database_path: ConfigSource,
    pub credential_path: ConfigSource,
    pub static_token: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl ResolvedConfig {
    /// Resolve from the real process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file exists but is invalid
    /// - An environment override cannot be parsed
    pub fn resolve(overrides: &CliOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an injectable environment lookup.
    ///
    /// # Errors
    /// See [`Self::resolve`].
    pub fn resolve_with(
        overrides: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config_path = overrides
            .config
            .clone()
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from))
            .unwrap_or_else(Config::config_path);
        let config = Config::load_from(&config_path)?;
        config.validate()?;

        Self::from_parts(overrides, &config, config_path, env)
    }

    fn from_parts(
        overrides: &CliOverrides,
        config: &Config,
        config_path: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut sources = ConfigSources::default();
        let paths = AppPaths::new();
        // Defaults deserialized for a missing file are not file values.
        let from_file = config_path.exists();

        let base_url = pick(
            overrides.base_url.clone(),
            env(ENV_BASE_URL),
            from_file.then(|| config.api.base_url.clone()),
            ApiConfig::default().base_url,
            &mut sources.base_url,
        );

        let env_vehicles = env(ENV_VEHICLES).map(|v| parse_vehicle_list(&v)).transpose()?;
        let vehicles = pick(
            (!overrides.vehicles.is_empty()).then(|| overrides.vehicles.clone()),
            env_vehicles,
            (!config.vehicles.ids.is_empty()).then(|| config.vehicles.ids.clone()),
            Vec::new(),
            &mut sources.vehicles,
        );

        let env_interval = env(ENV_INTERVAL)
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    FleetError::Config(format!("{ENV_INTERVAL} must be a whole number of seconds, got \"{v}\""))
                })
            })
            .transpose()?;
        let interval_secs = pick(
            overrides.interval,
            env_interval,
            from_file.then_some(config.polling.interval_seconds),
            PollingConfig::default().interval_seconds,
            &mut sources.interval,
        );
        if interval_secs == 0 {
            return Err(FleetError::Config(
                "Polling interval must be at least 1 second".to_string(),
            ));
        }

        let database_path = pick(
            overrides.db.clone(),
            env(ENV_DB).map(PathBuf::from),
            config.storage.database_path.clone(),
            paths.history_db_file(),
            &mut sources.database_path,
        );
        let credential_path = pick(
            overrides.token_file.clone(),
            env(ENV_TOKEN_FILE).map(PathBuf::from),
            config.storage.credential_path.clone(),
            paths.token_file(),
            &mut sources.credential_path,
        );

        let static_token = env(ENV_ACCESS_TOKEN);
        if static_token.is_some() {
            sources.static_token = ConfigSource::Env;
        }

        Ok(Self {
            base_url,
            login_url: config.api.login_url.clone(),
            request_timeout: Duration::from_secs(config.api.request_timeout_seconds),
            vehicles,
            interval: Duration::from_secs(interval_secs),
            vehicle_delay: Duration::from_millis(config.polling.vehicle_delay_ms),
            max_concurrency: config.polling.max_concurrency,
            database_path,
            credential_path,
            login_command: config.auth.login_command.clone(),
            login_args: config.auth.login_args.clone(),
            login_timeout: Duration::from_secs(config.auth.login_timeout_seconds),
            validity: TimeDelta::hours(config.auth.validity_hours),
            static_token,
            config_path,
            sources,
        })
    }

    /// Checks that only matter when polling.
    ///
    /// # Errors
    /// Returns a configuration error if no vehicles are configured or the
    /// base URL is not an absolute http(s) URL.
    pub fn validate_for_polling(&self) -> Result<()> {
        if self.vehicles.is_empty() {
            return Err(FleetError::Config(format!(
                "No vehicles to poll. Set [vehicles] ids in {}, {ENV_VEHICLES}, or pass --vehicle",
                self.config_path.display()
            )));
        }

        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            FleetError::Config(format!("Invalid API base URL \"{}\": {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FleetError::Config(format!(
                "API base URL must be http or https, got \"{}\"",
                self.base_url
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            vehicles: self.vehicles.clone(),
            interval: self.interval,
            vehicle_delay: self.vehicle_delay,
            max_concurrency: self.max_concurrency,
        }
    }

    #[must_use]
    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(&self.credential_path).with_validity(self.validity)
    }
}

/// First present value wins; records where it came from.
fn pick<T>(
    cli: Option<T>,
    env: Option<T>,
    file: Option<T>,
    default: T,
    source: &mut ConfigSource,
) -> T {
    if let Some(v) = cli {
        *source = ConfigSource::Cli;
        v
    } else if let Some(v) = env {
        *source = ConfigSource::Env;
        v
    } else if let Some(v) = file {
        *source = ConfigSource::ConfigFile;
        v
    } else {
        *source = ConfigSource::Default;
        default
    }
}

/// Parse `"42, 43,44"` into ids.
///
/// # Errors
/// Returns a configuration error naming the first invalid entry.
pub fn parse_vehicle_list(value: &str) -> Result<Vec<VehicleId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<VehicleId>()
                .map_err(|_| FleetError::Config(format!("Invalid vehicle id \"{s}\"")))
        })
        .collect()
}

// =============================================================================
// Config File
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub polling: PollingConfig,
    pub vehicles: VehiclesConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Login page the helper drives; passed to it as `FLEETWATCH_LOGIN_URL`.
    pub login_url: Option<String>,
    pub request_timeout_seconds: u64,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    /// Pause between vehicles, bounds the request rate.
    pub vehicle_delay_ms: u64,
    /// 1 = sequential.
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VehiclesConfig {
    pub ids: Vec<VehicleId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
    pub credential_path: Option<PathBuf>,
}

/// Login helper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Program that prints an access token on stdout.
    pub login_command: Option<String>,
    pub login_args: Vec<String>,
    pub login_timeout_seconds: u64,
    pub validity_hours: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.fleetx.io".to_string(),
            login_url: Some("https://app.fleetx.io/login".to_string()),
            request_timeout_seconds: 30,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            vehicle_delay_ms: 2000,
            max_concurrency: 1,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_command: None,
            login_args: Vec::new(),
            login_timeout_seconds: 120,
            validity_hours: 12,
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// # Errors
    /// Returns an error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error only if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| FleetError::ConfigParse {
            path: path.display().to_string(),
            message: e.message().to_string(),
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| FleetError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns a configuration error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(FleetError::Config("api.base_url must not be empty".to_string()));
        }

        if self.api.request_timeout_seconds == 0 || self.api.request_timeout_seconds > 300 {
            return Err(FleetError::Config(
                "Request timeout must be between 1 and 300 seconds".to_string(),
            ));
        }

        if self.polling.interval_seconds == 0 {
            return Err(FleetError::Config(
                "Polling interval must be at least 1 second".to_string(),
            ));
        }

        if self.polling.max_concurrency == 0 || self.polling.max_concurrency > MAX_CONCURRENCY {
            return Err(FleetError::Config(format!(
                "max_concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }

        if !(1..=MAX_VALIDITY_HOURS).contains(&self.auth.validity_hours) {
            return Err(FleetError::Config(format!(
                "Token validity must be between 1 and {MAX_VALIDITY_HOURS} hours"
            )));
        }

        if self.auth.login_timeout_seconds == 0 {
            return Err(FleetError::Config(
                "Login timeout must be greater than 0 seconds".to_string(),
            ));
        }

        if let Some(command) = &self.auth.login_command {
            if command.trim().is_empty() {
                return Err(FleetError::Config(
                    "auth.login_command must not be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }
}
