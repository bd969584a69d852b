//! Error types for fleetwatch.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are grouped into the kinds the poller reacts to:
//! - **Acquisition**: obtaining a fresh credential failed
//! - **Auth**: the remote API rejected the bearer token (401/403)
//! - **Network**: connection, timeout, or non-2xx responses
//! - **Parse**: a response body did not decode into a snapshot
//! - **Storage**: the history database or credential file failed
//! - **Configuration**: config file parsing, validation, or missing values
//! - **Internal**: unexpected errors, bugs, or unclassified issues
//!
//! Each error has a stable error code (e.g., `FW-A001`) for programmatic
//! handling and for log correlation.

use serde::Serialize;
use thiserror::Error;

// =============================================================================
// Error Kinds
// =============================================================================

/// High-level error kinds used for classification and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential acquisition failed.
    Acquisition,
    /// Remote rejected the credential.
    Auth,
    /// Connectivity, timeout, or unexpected HTTP status.
    Network,
    /// Malformed response body.
    Parse,
    /// Persistence failure.
    Storage,
    /// Invalid or missing configuration.
    Configuration,
    /// Bugs and unclassified failures.
    Internal,
}

impl ErrorKind {
    /// Returns a human-readable description of the kind.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Acquisition => "Credential acquisition error",
            Self::Auth => "Authentication error",
            Self::Network => "Network error",
            Self::Parse => "Parse error",
            Self::Storage => "Storage error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns the short label used in structured logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acquisition => "acquisition",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Returns a short code prefix for this kind.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Acquisition => "Q",
            Self::Auth => "A",
            Self::Network => "N",
            Self::Parse => "P",
            Self::Storage => "S",
            Self::Configuration => "C",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Invalid configuration or arguments
    ConfigError = 2,
    /// Could not authenticate against the remote API
    AuthError = 3,
    /// Remote unreachable or timed out
    NetworkError = 4,
    /// Local persistence failed
    StorageError = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Main error type for fleetwatch operations.
#[derive(Error, Debug)]
pub enum FleetError {
    // ==========================================================================
    // Credential errors
    // ==========================================================================
    /// The credential acquirer could not produce a token.
    #[error("credential acquisition failed: {0}")]
    Acquisition(String),

    /// The remote API rejected the bearer token.
    #[error("authentication rejected (HTTP {status})")]
    AuthRejected { status: u16 },

    // ==========================================================================
    // Network errors
    // ==========================================================================
    /// Request timed out.
    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    /// Connectivity failure or unexpected HTTP status.
    #[error("network error: {0}")]
    Network(String),

    // ==========================================================================
    // Parse errors
    // ==========================================================================
    /// Failed to decode a response body.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    // ==========================================================================
    // Storage errors
    // ==========================================================================
    /// History database failure. No partial write was committed.
    #[error("storage error: {0}")]
    Storage(String),

    // ==========================================================================
    // Configuration errors
    // ==========================================================================
    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error parsing a configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    // ==========================================================================
    // Internal errors
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FleetError {
    /// Wrap a rusqlite failure with context.
    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }

    /// Returns the error kind for classification and retry policy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Acquisition(_) => ErrorKind::Acquisition,
            Self::AuthRejected { .. } => ErrorKind::Auth,
            Self::Timeout(_) | Self::Network(_) => ErrorKind::Network,
            Self::ParseResponse(_) => ErrorKind::Parse,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) | Self::ConfigParse { .. } => ErrorKind::Configuration,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Map error to a process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self.kind() {
            ErrorKind::Configuration => ExitCode::ConfigError,
            ErrorKind::Acquisition | ErrorKind::Auth => ExitCode::AuthError,
            ErrorKind::Network | ErrorKind::Parse => ExitCode::NetworkError,
            ErrorKind::Storage => ExitCode::StorageError,
            ErrorKind::Internal => ExitCode::GeneralError,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `FW-{kind}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Acquisition(_) => "FW-Q001",
            Self::AuthRejected { .. } => "FW-A001",
            Self::Timeout(_) => "FW-N001",
            Self::Network(_) => "FW-N099",
            Self::ParseResponse(_) => "FW-P001",
            Self::Storage(_) => "FW-S001",
            Self::Config(_) => "FW-C001",
            Self::ConfigParse { .. } => "FW-C002",
            Self::Io(_) => "FW-X001",
            Self::Json(_) => "FW-X002",
            Self::Other(_) => "FW-X099",
        }
    }

    /// Whether a later attempt (next cycle) could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::AuthRejected { .. } | Self::Storage(_)
        )
    }

    /// True when the remote rejected the token.
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }
}

/// Result type alias for fleetwatch operations.
pub type Result<T> = std::result::Result<T, FleetError>;
