//! Security features.
//!
//! Field encryption for tenant secrets and credential shape checks.

mod credentials;
mod encryption;

pub use credentials::{validate_discord_token, validate_github_token, validate_gitlab_token};
pub use encryption::{EncryptionKey, Encryptor};
