//! Row conversion for the `setups` table.
//!
//! Two projections exist. [`SetupRow`] reads every column, including the
//! encrypted ones, and is only turned into a [`FullSetup`]. [`PUBLIC_COLUMNS`]
//! never selects a secret column and maps straight to [`PublicSetupInfo`].

use crate::models::{DeliveryToken, FullSetup, Platform, PublicSetupInfo, SetupId};
use crate::security::Encryptor;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Row;
use secrecy::SecretString;

/// Columns selected for a full (internal) read.
pub const FULL_COLUMNS: &str = "id, delivery_token, discord_token, discord_client_id, \
     discord_guild_id, discord_channel_id, github_token, github_owner, github_repo, \
     gitlab_token, gitlab_url, gitlab_username, current_platform, current_repo, \
     current_branch, is_active, created_at, updated_at";

/// Columns selected for a public read. No secret column appears here.
pub const PUBLIC_COLUMNS: &str = "id, delivery_token, discord_client_id, discord_guild_id, \
     discord_channel_id, github_owner, github_repo, gitlab_url, gitlab_username, \
     current_platform, current_repo, current_branch, created_at, updated_at";

/// Raw `setups` row, secrets still encrypted.
#[derive(Debug)]
pub struct SetupRow {
    id: String,
    delivery_token: String,
    discord_token: String,
    discord_client_id: String,
    discord_guild_id: String,
    discord_channel_id: String,
    github_token: String,
    github_owner: String,
    github_repo: String,
    gitlab_token: Option<String>,
    gitlab_url: Option<String>,
    gitlab_username: Option<String>,
    current_platform: String,
    current_repo: Option<String>,
    current_branch: String,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

impl SetupRow {
    /// Reads a row selected with [`FULL_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            delivery_token: row.get(1)?,
            discord_token: row.get(2)?,
            discord_client_id: row.get(3)?,
            discord_guild_id: row.get(4)?,
            discord_channel_id: row.get(5)?,
            github_token: row.get(6)?,
            github_owner: row.get(7)?,
            github_repo: row.get(8)?,
            gitlab_token: row.get(9)?,
            gitlab_url: row.get(10)?,
            gitlab_username: row.get(11)?,
            current_platform: row.get(12)?,
            current_repo: row.get(13)?,
            current_branch: row.get(14)?,
            is_active: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    /// Decrypts the secret columns.
    ///
    /// A column that fails to decrypt becomes `None` and is logged; the other
    /// fields are still returned.
    pub fn into_full_setup(self, encryptor: &Encryptor) -> FullSetup {
        let id = self.id;
        let decrypt = |field: &'static str, value: &str| -> Option<SecretString> {
            match encryptor.decrypt_field(value) {
                Ok(secret) => Some(secret),
                Err(e) => {
                    tracing::error!(setup_id = %id, field, error = %e, "Failed to decrypt secret field");
                    metrics::counter!("secret_decrypt_failures_total", "field" => field)
                        .increment(1);
                    None
                },
            }
        };

        let discord_token = decrypt("discord_token", &self.discord_token);
        let github_token = decrypt("github_token", &self.github_token);
        let gitlab_token = self
            .gitlab_token
            .as_deref()
            .and_then(|value| decrypt("gitlab_token", value));

        FullSetup {
            id: SetupId::new(id),
            delivery_token: DeliveryToken::new(self.delivery_token),
            discord_token,
            discord_client_id: self.discord_client_id,
            discord_guild_id: self.discord_guild_id,
            discord_channel_id: self.discord_channel_id,
            github_token,
            github_owner: self.github_owner,
            github_repo: self.github_repo,
            gitlab_token,
            gitlab_url: self.gitlab_url,
            gitlab_username: self.gitlab_username,
            current_platform: Platform::parse(&self.current_platform).unwrap_or_default(),
            current_repo: self.current_repo,
            current_branch: self.current_branch,
            is_active: self.is_active,
            created_at: millis_to_datetime(self.created_at),
            updated_at: millis_to_datetime(self.updated_at),
        }
    }
}

/// Reads a row selected with [`PUBLIC_COLUMNS`].
pub fn public_info_from_row(row: &Row<'_>) -> rusqlite::Result<PublicSetupInfo> {
    let github_owner: String = row.get(5)?;
    let github_repo: String = row.get(6)?;
    let current_platform: String = row.get(9)?;

    Ok(PublicSetupInfo {
        id: SetupId::new(row.get::<_, String>(0)?),
        delivery_token: DeliveryToken::new(row.get::<_, String>(1)?),
        repo: format!("{github_owner}/{github_repo}"),
        discord_client_id: row.get(2)?,
        discord_guild_id: row.get(3)?,
        discord_channel_id: row.get(4)?,
        github_owner,
        github_repo,
        gitlab_url: row.get(7)?,
        gitlab_username: row.get(8)?,
        current_platform: Platform::parse(&current_platform).unwrap_or_default(),
        current_repo: row.get(10)?,
        current_branch: row.get(11)?,
        created_at: millis_to_datetime(row.get(12)?),
        updated_at: millis_to_datetime(row.get(13)?),
    })
}

/// Converts stored unix milliseconds to a UTC timestamp.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
