//! Wiring from resolved configuration to the runtime components.

use std::sync::Arc;

use crate::core::acquire::{CommandAcquirer, CredentialAcquirer, StaticTokenAcquirer};
use crate::core::client::TelemetryClient;
use crate::core::poller::Poller;
use crate::core::session::AuthSession;
use crate::error::{FleetError, Result};
use crate::storage::config::{ENV_ACCESS_TOKEN, ResolvedConfig};
use crate::storage::history::HistoryStore;

/// Environment variable handed to the login helper.
pub const LOGIN_URL_ENV: &str = "FLEETWATCH_LOGIN_URL";

/// Pick the acquirer: a fixed token wins over the login helper.
///
/// # Errors
/// Returns a configuration error if neither is configured.
pub fn build_acquirer(config: &ResolvedConfig) -> Result<Arc<dyn CredentialAcquirer>> {
    if let Some(token) = &config.static_token {
        tracing::debug!("Using static access token from {ENV_ACCESS_TOKEN}");
        return Ok(Arc::new(StaticTokenAcquirer::new(token.clone())));
    }

    let Some(program) = &config.login_command else {
        return Err(FleetError::Config(format!(
            "No way to obtain an access token. Set auth.login_command in {} or {ENV_ACCESS_TOKEN}",
            config.config_path.display()
        )));
    };

    Ok(Arc::new(
        CommandAcquirer::new(program.clone(), config.login_args.clone())
            .with_env(LOGIN_URL_ENV, config.login_url.clone())
            .with_timeout(config.login_timeout),
    ))
}

/// Session over the configured credential file and acquirer.
///
/// # Errors
/// See [`build_acquirer`].
pub fn build_session(config: &ResolvedConfig) -> Result<Arc<AuthSession>> {
    let acquirer = build_acquirer(config)?;
    Ok(Arc::new(AuthSession::new(config.credential_store(), acquirer)))
}

/// Open the history database, creating parent directories.
///
/// # Errors
/// Returns a storage error if the database cannot be opened or migrated.
pub fn open_history(config: &ResolvedConfig) -> Result<Arc<HistoryStore>> {
    Ok(Arc::new(HistoryStore::open(&config.database_path)?))
}

/// Assemble a poller from configuration.
///
/// # Errors
/// Returns an error if validation fails or any component cannot be built.
pub fn build_poller(config: &ResolvedConfig) -> Result<Poller> {
    config.validate_for_polling()?;

    let client = TelemetryClient::with_timeout(config.base_url.clone(), config.request_timeout)?;
    let session = build_session(config)?;
    let store = open_history(config)?;

    Ok(Poller::new(
        Arc::new(client),
        session,
        store,
        config.poller_settings(),
    ))
}
