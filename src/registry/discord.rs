//! Discord REST connection.
//!
//! A connection is a validated bot token plus an HTTP client. Construction
//! authenticates against `GET /users/@me` and registers the tenant's guild
//! command set; sending posts to `/channels/{id}/messages`.

use super::{ChatConnection, ConnectionFactory};
use crate::models::{FullSetup, SetupId};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const OPTION_STRING: u8 = 3;
const OPTION_INTEGER: u8 = 4;

/// Slash commands registered in every tenant guild.
#[must_use]
pub fn guild_commands() -> Value {
    let option = |kind: u8, name: &str, description: &str, required: bool| {
        json!({ "type": kind, "name": name, "description": description, "required": required })
    };

    json!([
        {
            "name": "create-pr",
            "description": "Create a pull request",
            "options": [
                option(OPTION_STRING, "branch", "Branch name (head)", true),
                option(OPTION_STRING, "title", "Pull request title", true),
                option(OPTION_STRING, "body", "Optional description", false),
            ],
        },
        {
            "name": "approve-pr",
            "description": "Approve an existing pull request",
            "options": [option(OPTION_INTEGER, "number", "PR number", true)],
        },
        {
            "name": "comment-pr",
            "description": "Add a comment to a pull request",
            "options": [
                option(OPTION_INTEGER, "number", "PR number", true),
                option(OPTION_STRING, "text", "Comment text", true),
            ],
        },
        {
            "name": "merge-pr",
            "description": "Merge a pull request",
            "options": [
                option(OPTION_INTEGER, "number", "PR number", true),
                option(OPTION_STRING, "method", "merge | squash | rebase", false),
            ],
        },
        {
            "name": "create-branch",
            "description": "Create a new branch",
            "options": [
                option(OPTION_STRING, "name", "New branch name", true),
                option(OPTION_STRING, "base", "Base branch (default: main)", false),
            ],
        },
    ])
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
    username: String,
}

/// Builds [`DiscordConnection`]s against the Discord REST API.
#[derive(Debug, Clone)]
pub struct DiscordConnector {
    client: reqwest::Client,
    api_base: String,
    send_timeout: Duration,
}

impl DiscordConnector {
    /// Creates a connector for `api_base` (for example
    /// `https://discord.com/api/v10`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(api_base: &str, send_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("DiscordBot (hookcord, {})", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            send_timeout,
        })
    }

    async fn register_commands(&self, auth: &SecretString, setup: &FullSetup) -> Result<()> {
        let url = format!(
            "{}/applications/{}/guilds/{}/commands",
            self.api_base, setup.discord_client_id, setup.discord_guild_id
        );
        let response = self
            .client
            .put(url)
            .header(AUTHORIZATION, auth.expose_secret())
            .timeout(self.send_timeout)
            .json(&guild_commands())
            .send()
            .await
            .map_err(|e| Error::connection("register_commands", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::connection(
                "register_commands",
                format!("Discord returned HTTP {status}"),
            ))
        }
    }
}

#[async_trait]
impl ConnectionFactory for DiscordConnector {
    async fn connect(&self, setup: &FullSetup) -> Result<Arc<dyn ChatConnection>> {
        let token = setup.discord_token.as_ref().ok_or_else(|| {
            Error::connection("connect", "discord token unavailable (decryption failed)")
        })?;
        let auth = SecretString::from(format!("Bot {}", token.expose_secret()));

        let response = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header(AUTHORIZATION, auth.expose_secret())
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| Error::connection("authenticate", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::connection(
                "authenticate",
                format!("Discord returned HTTP {status}"),
            ));
        }
        let user: CurrentUser = response
            .json()
            .await
            .map_err(|e| Error::connection("authenticate", format!("invalid user body: {e}")))?;

        tracing::info!(
            setup_id = %setup.id,
            bot_user = %user.username,
            bot_id = %user.id,
            "Discord bot authenticated"
        );

        if let Err(e) = self.register_commands(&auth, setup).await {
            tracing::warn!(setup_id = %setup.id, error = %e, "Failed to register slash commands");
        }

        Ok(Arc::new(DiscordConnection {
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            auth,
            setup_id: setup.id.clone(),
            bot_user: user.username,
            ready: AtomicBool::new(true),
            send_timeout: self.send_timeout,
        }))
    }
}

/// Authenticated Discord session for one tenant.
pub struct DiscordConnection {
    client: reqwest::Client,
    api_base: String,
    auth: SecretString,
    setup_id: SetupId,
    bot_user: String,
    ready: AtomicBool,
    send_timeout: Duration,
}

impl std::fmt::Debug for DiscordConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConnection")
            .field("setup_id", &self.setup_id)
            .field("bot_user", &self.bot_user)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DiscordConnection {
    /// Returns the tenant this session belongs to.
    #[must_use]
    pub const fn setup_id(&self) -> &SetupId {
        &self.setup_id
    }

    /// Returns the authenticated bot's username.
    #[must_use]
    pub fn bot_user(&self) -> &str {
        &self.bot_user
    }
}

#[async_trait]
impl ChatConnection for DiscordConnection {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/channels/{channel_id}/messages", self.api_base))
            .header(AUTHORIZATION, self.auth.expose_secret())
            .timeout(self.send_timeout)
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(|e| Error::connection("send", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED {
            self.ready.store(false, Ordering::SeqCst);
            tracing::warn!(setup_id = %self.setup_id, "Discord rejected bot token, marking connection not ready");
        } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::ChannelRejected {
                channel_id: channel_id.to_string(),
                cause: format!("Discord returned HTTP {status}"),
            });
        }
        Err(Error::connection(
            "send",
            format!("Discord returned HTTP {status} for channel {channel_id}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_commands_shape() {
        let commands = guild_commands();
        let names: Vec<&str> = commands
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["create-pr", "approve-pr", "comment-pr", "merge-pr", "create-branch"]
        );
        assert_eq!(commands[1]["options"][0]["type"], 4);
        assert_eq!(commands[0]["options"][0]["required"], true);
    }

    #[test]
    fn test_connector_trims_api_base() {
        let connector =
            DiscordConnector::new("https://discord.com/api/v10/", Duration::from_secs(1)).unwrap();
        assert_eq!(connector.api_base, "https://discord.com/api/v10");
    }

    #[tokio::test]
    async fn test_connect_without_token_fails_fast() {
        let connector =
            DiscordConnector::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let setup = FullSetup {
            id: SetupId::new("setup_x"),
            delivery_token: crate::models::DeliveryToken::generate(),
            discord_token: None,
            discord_client_id: "1".to_string(),
            discord_guild_id: "2".to_string(),
            discord_channel_id: "3".to_string(),
            github_token: None,
            github_owner: "octo".to_string(),
            github_repo: "repo".to_string(),
            gitlab_token: None,
            gitlab_url: None,
            gitlab_username: None,
            current_platform: crate::models::Platform::GitHub,
            current_repo: None,
            current_branch: "main".to_string(),
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let err = connector.connect(&setup).await.err().unwrap();
        assert!(err.to_string().contains("decryption failed"));
    }
}
