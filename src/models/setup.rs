//! Tenant configuration ("setup") types.
//!
//! A setup binds one Discord channel to one repository. Secrets only ever
//! appear in [`NewSetup`] (inbound, before encryption) and [`FullSetup`]
//! (decrypted for internal use). Everything that leaves the process goes
//! through [`PublicSetupInfo`], which has no secret fields at all.

use crate::security::{validate_discord_token, validate_github_token, validate_gitlab_token};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default GitLab instance when a GitLab token is supplied without a URL.
pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";

/// Default branch for the "current" repository pointer.
pub const DEFAULT_BRANCH: &str = "main";

/// Column names of the secret fields. Never accepted by the update path.
pub const SECRET_FIELDS: &[&str] = &["discord_token", "github_token", "gitlab_token"];

/// Internal setup identifier. Never exposed in webhook URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetupId(String);

impl SetupId {
    /// Generates a new random setup id (`setup_<uuid>`).
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("setup_{}", uuid::Uuid::new_v4()))
    }

    /// Wraps an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SetupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SetupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque per-setup token embedded in the inbound webhook URL.
///
/// Issued once at creation and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    /// Generates a new random delivery token.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an existing token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source-control platform the "current" pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// github.com
    #[default]
    GitHub,
    /// gitlab.com or a self-hosted GitLab.
    GitLab,
}

impl Platform {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }

    /// Parses a platform string, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "github" => Some(Self::GitHub),
            "gitlab" => Some(Self::GitLab),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional second source-control host.
#[derive(Debug, Deserialize)]
pub struct GitLabCredentials {
    /// Personal or OAuth access token.
    pub token: SecretString,
    /// Instance base URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Account username.
    #[serde(default)]
    pub username: Option<String>,
}

/// Setup creation request, as submitted.
///
/// Field names accept both `snake_case` and the `camelCase` used by the
/// setup web page.
#[derive(Debug, Default, Deserialize)]
pub struct NewSetup {
    /// Discord bot token.
    #[serde(default, alias = "discordToken")]
    pub discord_token: Option<SecretString>,
    /// Discord application id.
    #[serde(default, alias = "discordClientId")]
    pub discord_client_id: Option<String>,
    /// Discord guild id.
    #[serde(default, alias = "discordGuildId")]
    pub discord_guild_id: Option<String>,
    /// Discord channel receiving notifications.
    #[serde(default, alias = "discordChannelId")]
    pub discord_channel_id: Option<String>,
    /// GitHub access token.
    #[serde(default, alias = "githubToken")]
    pub github_token: Option<SecretString>,
    /// Repository owner.
    #[serde(default, alias = "githubOwner")]
    pub github_owner: Option<String>,
    /// Repository name.
    #[serde(default, alias = "githubRepo")]
    pub github_repo: Option<String>,
    /// Optional GitLab credentials.
    #[serde(default)]
    pub gitlab: Option<GitLabCredentials>,
}

/// A creation request that passed validation.
#[derive(Debug)]
pub struct ValidatedSetup {
    /// Discord bot token.
    pub discord_token: SecretString,
    /// Discord application id.
    pub discord_client_id: String,
    /// Discord guild id.
    pub discord_guild_id: String,
    /// Discord channel receiving notifications.
    pub discord_channel_id: String,
    /// GitHub access token.
    pub github_token: SecretString,
    /// Repository owner.
    pub github_owner: String,
    /// Repository name.
    pub github_repo: String,
    /// GitLab token, instance URL and username.
    pub gitlab: Option<(SecretString, String, Option<String>)>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn secret_present(value: Option<&SecretString>) -> Option<&str> {
    present(value.map(ExposeSecret::expose_secret))
}

fn validate_snowflake(field: &str, value: &str) -> Result<()> {
    if value.len() >= 15 && value.len() <= 21 && value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{field} must be a Discord snowflake id (15-21 digits)"
        )))
    }
}

fn validate_repo_part(field: &str, value: &str) -> Result<()> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid && value != "." && value != ".." {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{field} may only contain letters, digits, '-', '_' and '.'"
        )))
    }
}

impl NewSetup {
    /// Checks presence and basic shape of every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming every missing required field, or
    /// the first field with an invalid shape.
    pub fn validate(self) -> Result<ValidatedSetup> {
        let required = [
            ("discord_token", secret_present(self.discord_token.as_ref())),
            (
                "discord_client_id",
                present(self.discord_client_id.as_deref()),
            ),
            ("discord_guild_id", present(self.discord_guild_id.as_deref())),
            (
                "discord_channel_id",
                present(self.discord_channel_id.as_deref()),
            ),
            ("github_token", secret_present(self.github_token.as_ref())),
            ("github_owner", present(self.github_owner.as_deref())),
            ("github_repo", present(self.github_repo.as_deref())),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let [
            (_, Some(discord_token)),
            (_, Some(client_id)),
            (_, Some(guild_id)),
            (_, Some(channel_id)),
            (_, Some(github_token)),
            (_, Some(owner)),
            (_, Some(repo)),
        ] = required
        else {
            return Err(Error::Validation("missing required fields".to_string()));
        };

        validate_discord_token(discord_token)?;
        validate_snowflake("discord_client_id", client_id)?;
        validate_snowflake("discord_guild_id", guild_id)?;
        validate_snowflake("discord_channel_id", channel_id)?;
        validate_github_token(github_token)?;
        validate_repo_part("github_owner", owner)?;
        validate_repo_part("github_repo", repo)?;

        let gitlab = match &self.gitlab {
            Some(gitlab) => {
                validate_gitlab_token(gitlab.token.expose_secret())?;
                let url = present(gitlab.url.as_deref())
                    .unwrap_or(DEFAULT_GITLAB_URL)
                    .trim_end_matches('/')
                    .to_string();
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(Error::Validation(
                        "gitlab.url must be an http(s) URL".to_string(),
                    ));
                }
                let username = present(gitlab.username.as_deref()).map(str::to_string);
                Some((
                    SecretString::from(gitlab.token.expose_secret().to_string()),
                    url,
                    username,
                ))
            },
            None => None,
        };

        Ok(ValidatedSetup {
            discord_token: SecretString::from(discord_token.to_string()),
            discord_client_id: client_id.to_string(),
            discord_guild_id: guild_id.to_string(),
            discord_channel_id: channel_id.to_string(),
            github_token: SecretString::from(github_token.to_string()),
            github_owner: owner.to_string(),
            github_repo: repo.to_string(),
            gitlab,
        })
    }
}

/// A setup with decrypted secrets, for internal use only.
///
/// Secret fields are `None` when decryption failed; the rest of the row is
/// still usable.
#[derive(Debug)]
pub struct FullSetup {
    /// Internal id.
    pub id: SetupId,
    /// Webhook delivery token.
    pub delivery_token: DeliveryToken,
    /// Discord bot token.
    pub discord_token: Option<SecretString>,
    /// Discord application id.
    pub discord_client_id: String,
    /// Discord guild id.
    pub discord_guild_id: String,
    /// Discord channel receiving notifications.
    pub discord_channel_id: String,
    /// GitHub access token.
    pub github_token: Option<SecretString>,
    /// Repository owner.
    pub github_owner: String,
    /// Repository name.
    pub github_repo: String,
    /// GitLab access token.
    pub gitlab_token: Option<SecretString>,
    /// GitLab instance URL.
    pub gitlab_url: Option<String>,
    /// GitLab username.
    pub gitlab_username: Option<String>,
    /// Platform of the "current" pointer.
    pub current_platform: Platform,
    /// Repository of the "current" pointer.
    pub current_repo: Option<String>,
    /// Branch of the "current" pointer.
    pub current_branch: String,
    /// Whether the setup is active.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl FullSetup {
    /// Returns `owner/repo`.
    #[must_use]
    pub fn repo_full_name(&self) -> String {
        format!("{}/{}", self.github_owner, self.github_repo)
    }

    /// Projects this setup onto its non-secret fields.
    #[must_use]
    pub fn public_info(&self) -> PublicSetupInfo {
        PublicSetupInfo {
            id: self.id.clone(),
            delivery_token: self.delivery_token.clone(),
            repo: self.repo_full_name(),
            github_owner: self.github_owner.clone(),
            github_repo: self.github_repo.clone(),
            discord_client_id: self.discord_client_id.clone(),
            discord_guild_id: self.discord_guild_id.clone(),
            discord_channel_id: self.discord_channel_id.clone(),
            gitlab_url: self.gitlab_url.clone(),
            gitlab_username: self.gitlab_username.clone(),
            current_platform: self.current_platform,
            current_repo: self.current_repo.clone(),
            current_branch: self.current_branch.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Non-secret view of a setup. The only setup type that is serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicSetupInfo {
    /// Internal id.
    pub id: SetupId,
    /// Webhook delivery token.
    pub delivery_token: DeliveryToken,
    /// `owner/repo`.
    pub repo: String,
    /// Repository owner.
    pub github_owner: String,
    /// Repository name.
    pub github_repo: String,
    /// Discord application id.
    pub discord_client_id: String,
    /// Discord guild id.
    pub discord_guild_id: String,
    /// Discord channel receiving notifications.
    pub discord_channel_id: String,
    /// GitLab instance URL, when configured.
    pub gitlab_url: Option<String>,
    /// GitLab username, when configured.
    pub gitlab_username: Option<String>,
    /// Platform of the "current" pointer.
    pub current_platform: Platform,
    /// Repository of the "current" pointer.
    pub current_repo: Option<String>,
    /// Branch of the "current" pointer.
    pub current_branch: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Whitelisted non-secret changes to a setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupUpdate {
    /// New repository owner.
    pub github_owner: Option<String>,
    /// New repository name.
    pub github_repo: Option<String>,
    /// New destination channel.
    pub discord_channel_id: Option<String>,
    /// New "current" platform.
    pub current_platform: Option<Platform>,
    /// New "current" repository.
    pub current_repo: Option<String>,
    /// New "current" branch.
    pub current_branch: Option<String>,
}

impl SetupUpdate {
    /// Builds an update from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the body is not an object, names a
    /// secret field, names an unknown field, or carries an invalid value.
    pub fn from_json(body: &serde_json::Value) -> Result<Self> {
        let object = body
            .as_object()
            .ok_or_else(|| Error::Validation("update body must be a JSON object".to_string()))?;

        let mut update = Self::default();
        for (key, value) in object {
            if SECRET_FIELDS.contains(&key.as_str()) {
                return Err(Error::Validation(format!(
                    "{key} is a secret field and cannot be updated; re-run setup instead"
                )));
            }

            let text = value
                .as_str()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Validation(format!("{key} must be a non-empty string")))?;

            match key.as_str() {
                "github_owner" => {
                    validate_repo_part(key, text)?;
                    update.github_owner = Some(text.to_string());
                },
                "github_repo" => {
                    validate_repo_part(key, text)?;
                    update.github_repo = Some(text.to_string());
                },
                "discord_channel_id" => {
                    validate_snowflake(key, text)?;
                    update.discord_channel_id = Some(text.to_string());
                },
                "current_platform" => {
                    let platform = Platform::parse(text).ok_or_else(|| {
                        Error::Validation(format!("unknown platform: {text}"))
                    })?;
                    update.current_platform = Some(platform);
                },
                "current_repo" => update.current_repo = Some(text.to_string()),
                "current_branch" => update.current_branch = Some(text.to_string()),
                other => {
                    return Err(Error::Validation(format!("{other} cannot be updated")));
                },
            }
        }

        Ok(update)
    }

    /// Returns true if no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.github_owner.is_none()
            && self.github_repo.is_none()
            && self.discord_channel_id.is_none()
            && self.current_platform.is_none()
            && self.current_repo.is_none()
            && self.current_branch.is_none()
    }
}
