//! `SQLite` credential store.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE setups (
//!     id TEXT PRIMARY KEY,
//!     delivery_token TEXT NOT NULL UNIQUE,
//!     discord_token TEXT NOT NULL,        -- nonce_hex:ciphertext_hex
//!     discord_client_id TEXT NOT NULL,
//!     discord_guild_id TEXT NOT NULL,
//!     discord_channel_id TEXT NOT NULL,
//!     github_token TEXT NOT NULL,         -- nonce_hex:ciphertext_hex
//!     github_owner TEXT NOT NULL,
//!     github_repo TEXT NOT NULL,
//!     gitlab_token TEXT,                  -- nonce_hex:ciphertext_hex
//!     gitlab_url TEXT,
//!     gitlab_username TEXT,
//!     current_platform TEXT NOT NULL DEFAULT 'github',
//!     current_repo TEXT,
//!     current_branch TEXT NOT NULL DEFAULT 'main',
//!     is_active INTEGER NOT NULL DEFAULT 1,
//!     created_at INTEGER NOT NULL,        -- unix milliseconds
//!     updated_at INTEGER NOT NULL
//! );
//! ```

mod connection;
mod row;

pub use connection::{IN_MEMORY, acquire_lock, configure_connection, open_connection};

use super::CredentialStore;
use crate::models::{
    DEFAULT_BRANCH, DeliveryToken, FullSetup, NewSetup, Platform, PublicSetupInfo, SetupId,
    SetupUpdate,
};
use crate::security::Encryptor;
use crate::{Error, Result, current_timestamp_millis};
use row::{FULL_COLUMNS, PUBLIC_COLUMNS, SetupRow, millis_to_datetime, public_info_from_row};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use secrecy::ExposeSecret;
use std::sync::Mutex;

/// `SQLite`-backed [`CredentialStore`].
///
/// Secret columns are encrypted independently with a fresh nonce per write.
/// Decrypted secrets are never cached; every read decrypts again.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    encryptor: Encryptor,
}

impl std::fmt::Debug for SqliteCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCredentialStore").finish_non_exhaustive()
    }
}

impl SqliteCredentialStore {
    /// Opens (or creates) the store at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the database cannot be opened or the
    /// schema cannot be created.
    pub fn open(database_url: &str, encryptor: Encryptor) -> Result<Self> {
        let conn = open_connection(database_url)?;
        let store = Self {
            conn: Mutex::new(conn),
            encryptor,
        };
        store.initialize_schema()?;
        tracing::debug!(database_url, "Opened credential store");
        Ok(store)
    }

    /// Creates an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the schema cannot be created.
    pub fn in_memory(encryptor: Encryptor) -> Result<Self> {
        Self::open(IN_MEMORY, encryptor)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS setups (
                id TEXT PRIMARY KEY,
                delivery_token TEXT NOT NULL UNIQUE,
                discord_token TEXT NOT NULL,
                discord_client_id TEXT NOT NULL,
                discord_guild_id TEXT NOT NULL,
                discord_channel_id TEXT NOT NULL,
                github_token TEXT NOT NULL,
                github_owner TEXT NOT NULL,
                github_repo TEXT NOT NULL,
                gitlab_token TEXT,
                gitlab_url TEXT,
                gitlab_username TEXT,
                current_platform TEXT NOT NULL DEFAULT 'github',
                current_repo TEXT,
                current_branch TEXT NOT NULL DEFAULT 'main',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_setups_active_created
                ON setups(is_active, created_at DESC);
            ",
        )
        .map_err(|e| Error::storage("initialize_schema", e))
    }

    fn get_full(&self, column: &str, value: &str) -> Result<Option<FullSetup>> {
        let sql = format!("SELECT {FULL_COLUMNS} FROM setups WHERE {column} = ?1 AND is_active = 1");
        let conn = acquire_lock(&self.conn);
        let row = conn
            .query_row(&sql, params![value], SetupRow::from_row)
            .optional()
            .map_err(|e| Error::storage("get_setup", e))?;
        drop(conn);

        Ok(row.map(|row| row.into_full_setup(&self.encryptor)))
    }

    /// Returns whether a row with this id exists, active or not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on database failure.
    pub fn exists(&self, id: &SetupId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM setups WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| Error::storage("setup_exists", e))
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn create(&self, setup: NewSetup) -> Result<PublicSetupInfo> {
        let setup = setup.validate()?;

        let id = SetupId::generate();
        let delivery_token = DeliveryToken::generate();
        let now = current_timestamp_millis();

        let discord_token = self
            .encryptor
            .encrypt_field(setup.discord_token.expose_secret())?;
        let github_token = self
            .encryptor
            .encrypt_field(setup.github_token.expose_secret())?;
        let (gitlab_token, gitlab_url, gitlab_username) = match &setup.gitlab {
            Some((token, url, username)) => (
                Some(self.encryptor.encrypt_field(token.expose_secret())?),
                Some(url.clone()),
                username.clone(),
            ),
            None => (None, None, None),
        };

        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO setups (
                id, delivery_token, discord_token, discord_client_id, discord_guild_id,
                discord_channel_id, github_token, github_owner, github_repo,
                gitlab_token, gitlab_url, gitlab_username,
                current_platform, current_repo, current_branch, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL, ?14, 1, ?15, ?15)",
            params![
                id.as_str(),
                delivery_token.as_str(),
                discord_token,
                setup.discord_client_id,
                setup.discord_guild_id,
                setup.discord_channel_id,
                github_token,
                setup.github_owner,
                setup.github_repo,
                gitlab_token,
                gitlab_url,
                gitlab_username,
                Platform::GitHub.as_str(),
                DEFAULT_BRANCH,
                now,
            ],
        )
        .map_err(|e| Error::storage("insert_setup", e))?;
        drop(conn);

        tracing::info!(
            setup_id = %id,
            repo = %format!("{}/{}", setup.github_owner, setup.github_repo),
            channel_id = %setup.discord_channel_id,
            has_gitlab = gitlab_url.is_some(),
            "Created setup"
        );
        metrics::counter!("setups_created_total").increment(1);

        Ok(PublicSetupInfo {
            repo: format!("{}/{}", setup.github_owner, setup.github_repo),
            id,
            delivery_token,
            github_owner: setup.github_owner,
            github_repo: setup.github_repo,
            discord_client_id: setup.discord_client_id,
            discord_guild_id: setup.discord_guild_id,
            discord_channel_id: setup.discord_channel_id,
            gitlab_url,
            gitlab_username,
            current_platform: Platform::GitHub,
            current_repo: None,
            current_branch: DEFAULT_BRANCH.to_string(),
            created_at: millis_to_datetime(now),
            updated_at: millis_to_datetime(now),
        })
    }

    fn get_by_delivery_token(&self, token: &str) -> Result<Option<FullSetup>> {
        self.get_full("delivery_token", token)
    }

    fn get_by_id(&self, id: &SetupId) -> Result<Option<FullSetup>> {
        self.get_full("id", id.as_str())
    }

    fn list_active(&self) -> Result<Vec<PublicSetupInfo>> {
        let sql = format!(
            "SELECT {PUBLIC_COLUMNS} FROM setups WHERE is_active = 1 \
             ORDER BY created_at DESC, rowid DESC"
        );
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::storage("list_active", e))?;
        let rows = stmt
            .query_map([], public_info_from_row)
            .map_err(|e| Error::storage("list_active", e))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::storage("list_active", e))
    }

    fn disable(&self, id: &SetupId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let affected = conn
            .execute(
                "UPDATE setups SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
                params![id.as_str(), current_timestamp_millis()],
            )
            .map_err(|e| Error::storage("disable_setup", e))?;

        if affected > 0 {
            tracing::info!(setup_id = %id, "Disabled setup");
        }
        Ok(affected > 0)
    }

    fn update_non_secret(&self, id: &SetupId, update: &SetupUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }

        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut set = |column: &'static str, value: Option<&str>| {
            if let Some(value) = value {
                assignments.push(column);
                values.push(Value::Text(value.to_string()));
            }
        };
        set("github_owner", update.github_owner.as_deref());
        set("github_repo", update.github_repo.as_deref());
        set("discord_channel_id", update.discord_channel_id.as_deref());
        set(
            "current_platform",
            update.current_platform.as_ref().map(Platform::as_str),
        );
        set("current_repo", update.current_repo.as_deref());
        set("current_branch", update.current_branch.as_deref());

        let mut clauses: Vec<String> = assignments
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = ?{}", i + 1))
            .collect();
        values.push(Value::Integer(current_timestamp_millis()));
        clauses.push(format!("updated_at = ?{}", values.len()));
        values.push(Value::Text(id.as_str().to_string()));
        let sql = format!(
            "UPDATE setups SET {} WHERE id = ?{} AND is_active = 1",
            clauses.join(", "),
            values.len()
        );

        let conn = acquire_lock(&self.conn);
        let affected = conn
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| Error::storage("update_setup", e))?;

        if affected > 0 {
            tracing::info!(setup_id = %id, fields = ?assignments, "Updated setup");
        }
        Ok(affected > 0)
    }
}
