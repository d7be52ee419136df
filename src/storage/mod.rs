//! Credential storage.
//!
//! Durable, confidential storage of tenant setups. The store is the system
//! of record; nothing above it caches decrypted secrets.

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod sqlite;

pub use sqlite::SqliteCredentialStore;

use crate::models::{FullSetup, NewSetup, PublicSetupInfo, SetupId, SetupUpdate};
use crate::{Error, Result};
use std::sync::Arc;

/// Trait for credential store backends.
///
/// Storage errors propagate as [`Error::Storage`] and are never retried
/// here. Misses are `Ok(None)`, not errors.
pub trait CredentialStore: Send + Sync {
    /// Validates, encrypts and persists a new setup.
    ///
    /// Generates the internal id and the delivery token. Returns only
    /// non-secret fields.
    fn create(&self, setup: NewSetup) -> Result<PublicSetupInfo>;

    /// Looks up an active setup by delivery token, decrypting its secrets.
    fn get_by_delivery_token(&self, token: &str) -> Result<Option<FullSetup>>;

    /// Looks up an active setup by internal id, decrypting its secrets.
    fn get_by_id(&self, id: &SetupId) -> Result<Option<FullSetup>>;

    /// Lists active setups, newest first, without secrets.
    fn list_active(&self) -> Result<Vec<PublicSetupInfo>>;

    /// Soft-deletes a setup. Returns whether a row changed.
    fn disable(&self, id: &SetupId) -> Result<bool>;

    /// Applies whitelisted non-secret changes to an active setup. Returns
    /// whether a row changed; disabled setups are never updated.
    fn update_non_secret(&self, id: &SetupId, update: &SetupUpdate) -> Result<bool>;
}

/// Runs a store operation on the blocking thread pool.
///
/// # Errors
///
/// Returns the operation's error, or [`Error::Storage`] if the blocking task
/// panicked or was cancelled.
pub async fn run_blocking<T, F>(store: &Arc<dyn CredentialStore>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn CredentialStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| Error::storage("spawn_blocking", e))?
}
