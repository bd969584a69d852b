//! Process-wide credential lifecycle with single-flight acquisition.
//!
//! [`AuthSession`] hands out the active [`Credential`] by value. Callers that
//! need a new one (none cached, expired, or rejected by the remote) funnel
//! through one async gate: the first caller acquires, everyone queued behind
//! it receives the same result, success or failure.
//!
//! The credential itself sits behind a short-lived `RwLock` that is only held
//! to read or swap the value, never across an await point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::core::acquire::CredentialAcquirer;
use crate::core::models::Credential;
use crate::error::{FleetError, Result};
use crate::storage::credentials::CredentialStore;

/// Owns the live credential, its persistence, and renewal.
pub struct AuthSession {
    store: CredentialStore,
    acquirer: Arc<dyn CredentialAcquirer>,
    current: RwLock<Option<Credential>>,
    gate: Mutex<()>,
    /// Bumped when an acquisition finishes, whatever its outcome.
    completed: AtomicU64,
    last_failure: RwLock<Option<String>>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("store", &self.store)
            .field("acquirer", &self.acquirer.name())
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    #[must_use]
    pub fn new(store: CredentialStore, acquirer: Arc<dyn CredentialAcquirer>) -> Self {
        Self {
            store,
            acquirer,
            current: RwLock::new(None),
            gate: Mutex::new(()),
            completed: AtomicU64::new(0),
            last_failure: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The active credential, acquiring one if nothing valid is cached or
    /// persisted.
    ///
    /// # Errors
    /// Returns [`FleetError::Acquisition`] if a needed acquisition fails.
    pub async fn current(&self) -> Result<Credential> {
        if let Some(credential) = self.cached_valid() {
            return Ok(credential);
        }

        let seen = self.completed.load(Ordering::SeqCst);
        let _gate = self.gate.lock().await;

        if let Some(credential) = self.cached_valid() {
            return Ok(credential);
        }
        if self.completed.load(Ordering::SeqCst) != seen {
            return Err(self.shared_failure());
        }

        if let Some(credential) = self.store.load_valid(Utc::now()) {
            tracing::info!(token = %credential.redacted(), "Loaded saved access token");
            self.swap(Some(credential.clone()));
            return Ok(credential);
        }

        self.acquire_locked().await
    }

    /// Replace a credential the remote rejected.
    ///
    /// The stale credential is discarded in memory and on disk and exactly one
    /// acquisition runs. Concurrent callers presenting the same stale token
    /// share that acquisition; callers presenting a token that was already
    /// replaced get the replacement straight away.
    ///
    /// # Errors
    /// Returns [`FleetError::Acquisition`] if the acquisition fails.
    pub async fn renew(&self, stale: &Credential) -> Result<Credential> {
        let seen = self.completed.load(Ordering::SeqCst);
        let _gate = self.gate.lock().await;

        if let Some(credential) = self.cached_valid() {
            if credential.access_token() != stale.access_token() {
                return Ok(credential);
            }
        } else if self.completed.load(Ordering::SeqCst) != seen {
            return Err(self.shared_failure());
        }

        tracing::warn!(token = %stale.redacted(), "Access token rejected, invalidating");
        self.swap(None);
        if let Err(e) = self.store.invalidate() {
            tracing::warn!(error = %e, "Could not remove saved token");
        }

        self.acquire_locked().await
    }

    /// Acquire a new credential unconditionally (explicit login).
    ///
    /// # Errors
    /// Returns [`FleetError::Acquisition`] if the acquisition fails.
    pub async fn login(&self) -> Result<Credential> {
        let _gate = self.gate.lock().await;
        self.acquire_locked().await
    }

    /// Forget the credential in memory and on disk.
    ///
    /// # Errors
    /// Returns an error if the persisted file cannot be removed.
    pub async fn logout(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.swap(None);
        self.store.invalidate()
    }

    /// Must be called with the gate held.
    ///
    /// Waiters snapshot `completed` before queueing on the gate, so the
    /// counter moves only after the outcome is recorded.
    async fn acquire_locked(&self) -> Result<Credential> {
        tracing::info!(acquirer = self.acquirer.name(), "Acquiring new access token");

        let outcome = self.acquirer.acquire().await;
        let result = match outcome {
            Ok(credential) => {
                if let Err(e) = self.store.save(&credential) {
                    tracing::warn!(error = %e, "Could not save token for reuse");
                }
                self.swap(Some(credential.clone()));
                *self
                    .last_failure
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = None;
                Ok(credential)
            }
            Err(e) => {
                tracing::error!(error = %e, error_code = e.error_code(), "Credential acquisition failed");
                *self
                    .last_failure
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                Err(match e {
                    FleetError::Acquisition(_) => e,
                    other => FleetError::Acquisition(other.to_string()),
                })
            }
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn cached_valid(&self) -> Option<Credential> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|c| self.store.is_valid(c, Utc::now()))
            .cloned()
    }

    fn swap(&self, credential: Option<Credential>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credential;
    }

    fn shared_failure(&self) -> FleetError {
        let reason = self
            .last_failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "concurrent acquisition failed".to_string());
        FleetError::Acquisition(reason)
    }
}
