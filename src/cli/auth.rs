//! `auth` subcommands.

use chrono::Utc;
use serde::Serialize;

use crate::cli::args::{AuthCommand, OutputFormat};
use crate::cli::context::build_session;
use crate::error::Result;
use crate::storage::config::ResolvedConfig;
use crate::storage::credentials::CredentialStore;

/// Saved token state as reported by `auth status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub path: String,
    pub present: bool,
    pub valid: bool,
    pub acquired_at: Option<String>,
    pub expires_at: Option<String>,
    pub token: Option<String>,
}

impl TokenStatus {
    #[must_use]
    pub fn inspect(store: &CredentialStore) -> Self {
        let now = Utc::now();
        let path = store.path().display().to_string();
        match store.load() {
            Some(credential) => Self {
                path,
                present: true,
                valid: store.is_valid(&credential, now),
                acquired_at: Some(credential.acquired_at().to_rfc3339()),
                expires_at: Some(credential.expires_at(store.validity()).to_rfc3339()),
                token: Some(credential.redacted()),
            },
            None => Self {
                path,
                present: false,
                valid: false,
                acquired_at: None,
                expires_at: None,
                token: None,
            },
        }
    }
}

/// Execute an auth subcommand.
///
/// # Errors
/// Returns an error if acquisition fails (`login`), or the token file
/// cannot be removed (`logout`).
pub async fn execute(
    cmd: &AuthCommand,
    config: &ResolvedConfig,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        AuthCommand::Login => {
            let session = build_session(config)?;
            let credential = session.login().await?;
            let expires = credential.expires_at(config.validity);
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "command": "auth login",
                        "token": credential.redacted(),
                        "expiresAt": expires.to_rfc3339(),
                        "path": config.credential_path.display().to_string(),
                    })
                ),
                OutputFormat::Human => {
                    println!(
                        "Saved token {} to {}",
                        credential.redacted(),
                        config.credential_path.display()
                    );
                    println!("Valid until {}", expires.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
        }
        AuthCommand::Status => {
            let status = TokenStatus::inspect(&config.credential_store());
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&status)?),
                OutputFormat::Human => print_status(&status),
            }
        }
        AuthCommand::Logout => {
            // No acquirer needed to forget a token.
            config.credential_store().invalidate()?;
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "command": "auth logout", "removed": true })
                ),
                OutputFormat::Human => println!("Removed saved token."),
            }
        }
    }
    Ok(())
}

fn print_status(status: &TokenStatus) {
    println!("Token file: {}", status.path);
    if !status.present {
        println!("No saved token. Run `fleetwatch auth login`.");
        return;
    }
    if let Some(token) = &status.token {
        println!("Token:      {token}");
    }
    if let Some(acquired) = &status.acquired_at {
        println!("Acquired:   {acquired}");
    }
    if let Some(expires) = &status.expires_at {
        println!("Expires:    {expires}");
    }
    println!("Valid:      {}", if status.valid { "yes" } else { "no (expired)" });
}
