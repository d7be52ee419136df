//! # Hookcord
//!
//! Multi-tenant relay between source-control webhooks and Discord bots.
//!
//! Each tenant ("setup") binds one Discord channel to one repository and owns
//! its own encrypted credentials and an opaque delivery token. Inbound
//! webhooks are routed by that token to the tenant's bot connection, and the
//! event payload is normalized into a chat message.
//!
//! ## Components
//!
//! - [`storage`]: encrypted credential store with soft-delete
//! - [`registry`]: at-most-one live chat connection per tenant
//! - [`normalizer`]: pure payload-to-message rendering
//! - [`dispatch`]: orchestration of one inbound webhook delivery
//! - [`server`]: HTTP surface (webhook intake and setup API)
//!
//! ## Example
//!
//! ```rust,ignore
//! use hookcord::{RelayConfig, storage::SqliteCredentialStore};
//!
//! let config = RelayConfig::load(None)?;
//! let store = SqliteCredentialStore::open(&config.database_url, config.encryptor()?)?;
//! let setups = store.list_active()?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod dispatch;
pub mod models;
pub mod normalizer;
pub mod observability;
pub mod registry;
pub mod security;
pub mod server;
pub mod storage;

pub use config::RelayConfig;
pub use dispatch::{DispatchOutcome, InboundEvent, WebhookDispatcher};
pub use models::{
    DeliveryToken, EventKind, FullSetup, NewSetup, Notification, PublicSetupInfo, SetupId,
    SetupUpdate,
};
pub use registry::{ChatConnection, ConnectionFactory, ConnectionRegistry, ConnectionState};
pub use storage::{CredentialStore, SqliteCredentialStore};

/// Error type for hookcord operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Surfaced As |
/// |---------|-------------|-------------|
/// | `Validation` | Missing or malformed setup/update input | 400 |
/// | `NotFound` | Token or id does not resolve to an active setup | 404 |
/// | `Storage` | `SQLite` failures, lock failures, cipher failures on write | 500 |
/// | `MalformedPayload` | Webhook payload lacks fields an event kind requires | warning message in the tenant channel |
/// | `Connection` | Discord session construction or send failure, timeouts | registry eviction, logged |
/// | `ChannelRejected` | Discord refused a message for the channel (403, 404, other 4xx) | logged, no reconnect |
/// | `Config` | Missing or malformed process configuration | fatal at startup |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided to a setup or update operation.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A token or id did not resolve to an active setup.
    #[error("not found: {0}")]
    NotFound(String),

    /// The persistence layer failed.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An upstream webhook payload is missing fields required by its event kind.
    #[error("malformed {event} payload: {reason}")]
    MalformedPayload {
        /// Event kind being rendered.
        event: String,
        /// What was missing or invalid.
        reason: String,
    },

    /// Chat platform session construction or send failed.
    #[error("connection operation '{operation}' failed: {cause}")]
    Connection {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The chat platform refused a message for a channel the session can
    /// otherwise use. Reconnecting does not help.
    #[error("channel {channel_id} rejected message: {cause}")]
    ChannelRejected {
        /// Destination channel.
        channel_id: String,
        /// The platform's answer.
        cause: String,
    },

    /// Process configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Builds a [`Error::Storage`] from an operation name and any displayable cause.
    pub fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::Connection`] from an operation name and any displayable cause.
    pub fn connection(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Connection {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Returns whether a fresh connection could make a failed send succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ChannelRejected { .. })
    }

    /// Builds a [`Error::MalformedPayload`] for an event kind.
    pub fn malformed(event: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for hookcord operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("discord_token is required".to_string());
        assert_eq!(err.to_string(), "invalid input: discord_token is required");

        let err = Error::storage("insert_setup", "UNIQUE constraint failed");
        assert_eq!(
            err.to_string(),
            "storage operation 'insert_setup' failed: UNIQUE constraint failed"
        );

        let err = Error::malformed("pull_request", "missing pull_request");
        assert_eq!(
            err.to_string(),
            "malformed pull_request payload: missing pull_request"
        );
    }

    #[test]
    fn test_channel_rejection_is_not_retryable() {
        let err = Error::ChannelRejected {
            channel_id: "42".to_string(),
            cause: "HTTP 403 Forbidden".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "channel 42 rejected message: HTTP 403 Forbidden");
        assert!(Error::connection("send", "reset").is_retryable());
    }

    #[test]
    fn test_current_timestamp_is_positive() {
        assert!(current_timestamp_millis() > 0);
    }
}
