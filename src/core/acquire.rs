//! Credential acquisition.
//!
//! Acquisition is expensive and may prompt an interactive login, so the
//! implementations here never retry on their own. Serialization of
//! concurrent callers is handled by [`crate::core::session::AuthSession`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::cli_runner::run_command_with_env;
use crate::core::models::Credential;
use crate::error::{FleetError, Result};

/// Default timeout for the login helper.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Produces a fresh bearer credential.
#[async_trait]
pub trait CredentialAcquirer: Send + Sync {
    /// Obtain a new credential.
    ///
    /// # Errors
    /// Returns [`FleetError::Acquisition`] when no token could be produced.
    async fn acquire(&self) -> Result<Credential>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Runs an external login helper and reads the token from its stdout.
///
/// Accepted output, tried in order:
/// - `{"access_token": "..."}`
/// - `{"data": {"access_token": "..."}}` (persisted web-login state)
/// - the raw token as plain text
#[derive(Debug, Clone)]
pub struct CommandAcquirer {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl CommandAcquirer {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
            timeout: LOGIN_TIMEOUT,
        }
    }

    /// Set an environment variable for the helper; `None` leaves it unset.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        if let Some(value) = value {
            self.envs.push((key.into(), value));
        }
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CredentialAcquirer for CommandAcquirer {
    async fn acquire(&self) -> Result<Credential> {
        tracing::info!(program = %self.program, "Running login helper");
        let output = run_command_with_env(&self.program, &self.args, &self.envs, self.timeout).await?;

        if !output.success() {
            return Err(FleetError::Acquisition(format!(
                "{} exited with code {}: {}",
                self.program,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let token = extract_token(&output.stdout).ok_or_else(|| {
            FleetError::Acquisition(format!("{} printed no access token", self.program))
        })?;

        let credential = Credential::fresh(token);
        tracing::info!(token = %credential.redacted(), "Obtained access token");
        Ok(credential)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Hands out a fixed token, e.g. one provisioned through the environment.
#[derive(Clone)]
pub struct StaticTokenAcquirer {
    token: String,
}

impl StaticTokenAcquirer {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAcquirer").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialAcquirer for StaticTokenAcquirer {
    async fn acquire(&self) -> Result<Credential> {
        if self.token.trim().is_empty() {
            return Err(FleetError::Acquisition("static token is empty".to_string()));
        }
        Ok(Credential::fresh(self.token.trim()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    data: Option<Box<TokenPayload>>,
}

/// Pull a token out of login helper output.
fn extract_token(stdout: &str) -> Option<String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        let payload: TokenPayload = serde_json::from_str(trimmed).ok()?;
        return payload
            .access_token
            .or_else(|| payload.data.and_then(|d| d.access_token))
            .filter(|t| !t.trim().is_empty());
    }

    // Helpers may log progress lines first; the token is the last line.
    trimmed
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .filter(|line| !line.contains(char::is_whitespace))
        .map(str::to_string)
}
