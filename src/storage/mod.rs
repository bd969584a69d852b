//! Storage for configuration, the saved token, and location history.

pub mod config;
pub mod credentials;
pub mod history;
pub mod history_schema;
pub mod paths;

pub use config::{
    CliOverrides, Config, ConfigSource, ConfigSources, ENV_ACCESS_TOKEN, ENV_BASE_URL, ENV_CONFIG,
    ENV_DB, ENV_INTERVAL, ENV_TOKEN_FILE, ENV_VEHICLES, ResolvedConfig,
};
pub use credentials::CredentialStore;
pub use history::{AppendOutcome, HistoryStore, RecordFilter, VehicleSummary};
pub use history_schema::run_migrations;
pub use paths::AppPaths;
