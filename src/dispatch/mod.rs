//! Webhook dispatch.
//!
//! Orchestrates one inbound delivery:
//!
//! ```text
//! token ──▶ CredentialStore ──▶ ConnectionRegistry ──▶ normalizer ──▶ send
//!              (lookup)            (get_or_create)       (render)
//! ```
//!
//! Steps run strictly in that order. Nothing here retries the inbound call;
//! the upstream sender owns redelivery.

mod inbound;

pub use inbound::{FORM_CONTENT_TYPE, InboundEvent};

use crate::models::{FullSetup, Notification, NotificationKind};
use crate::normalizer;
use crate::registry::{ChatConnection, ConnectionRegistry};
use crate::storage::{CredentialStore, run_blocking};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Result of dispatching one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The delivery token does not resolve to an active setup.
    NotFound,
    /// The event produced no notification (for example `ping`).
    Ignored,
    /// Notifications were sent.
    Delivered {
        /// Number of messages sent.
        sent: usize,
    },
}

/// Routes inbound webhooks to the owning tenant's chat connection.
pub struct WebhookDispatcher {
    store: Arc<dyn CredentialStore>,
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl WebhookDispatcher {
    /// Creates a new dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<ConnectionRegistry>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            send_timeout,
        }
    }

    /// Dispatches one delivery identified by `token`.
    ///
    /// An unknown token is [`DispatchOutcome::NotFound`], not an error. A
    /// malformed payload is reported to the tenant's channel as a warning and
    /// still counts as delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the lookup fails, or
    /// [`Error::Connection`] if no connection could be built or a message
    /// could not be sent after one reconstruction.
    pub async fn dispatch(&self, token: &str, event: InboundEvent) -> Result<DispatchOutcome> {
        let lookup = token.to_string();
        let setup = run_blocking(&self.store, move |store| store.get_by_delivery_token(&lookup))
            .await
            .inspect_err(|_| {
                metrics::counter!("webhook_dispatch_failures_total", "reason" => "storage")
                    .increment(1);
            })?;

        let Some(setup) = setup else {
            tracing::debug!(event = %event.kind, "Webhook for unknown delivery token");
            metrics::counter!(
                "webhook_deliveries_total",
                "event" => event.kind.to_string(),
                "outcome" => "not_found"
            )
            .increment(1);
            return Ok(DispatchOutcome::NotFound);
        };

        let event_name = event.kind.to_string();
        tracing::info!(
            setup_id = %setup.id,
            repo = %setup.repo_full_name(),
            event = %event_name,
            "Webhook received"
        );

        let connection = self.registry.get_or_create(&setup).await.inspect_err(|e| {
            tracing::error!(setup_id = %setup.id, error = %e, "Could not obtain chat connection");
            metrics::counter!("webhook_dispatch_failures_total", "reason" => "connect")
                .increment(1);
        })?;

        let notifications = match &event.payload {
            Ok(payload) => {
                normalizer::render_or_warn(&event.kind, payload, &setup.discord_channel_id)
            },
            Err(reason) => {
                tracing::warn!(
                    setup_id = %setup.id,
                    event = %event_name,
                    reason = %reason,
                    "Unreadable webhook body"
                );
                metrics::counter!("malformed_payloads_total", "event" => event_name.clone())
                    .increment(1);
                vec![normalizer::warning(&event.kind, reason, &setup.discord_channel_id)]
            },
        };

        if notifications.is_empty() {
            metrics::counter!(
                "webhook_deliveries_total",
                "event" => event_name,
                "outcome" => "ignored"
            )
            .increment(1);
            return Ok(DispatchOutcome::Ignored);
        }

        let mut connection = connection;
        for notification in &notifications {
            connection = self.send_with_retry(&setup, connection, notification).await?;
        }

        metrics::counter!(
            "webhook_deliveries_total",
            "event" => event_name,
            "outcome" => "delivered"
        )
        .increment(1);
        Ok(DispatchOutcome::Delivered {
            sent: notifications.len(),
        })
    }

    async fn send_once(
        &self,
        connection: &dyn ChatConnection,
        notification: &Notification,
    ) -> Result<()> {
        tokio::time::timeout(
            self.send_timeout,
            connection.send(&notification.channel_id, &notification.content),
        )
        .await
        .map_err(|_| {
            Error::connection("send", format!("timed out after {:?}", self.send_timeout))
        })?
    }

    /// Sends, and on failure evicts, reconstructs and tries exactly once more.
    ///
    /// A channel rejection on a ready connection is returned as is; the
    /// session is fine and a rebuild would only repeat the rejection.
    /// Returns the connection that succeeded so later messages reuse it.
    async fn send_with_retry(
        &self,
        setup: &FullSetup,
        connection: Arc<dyn ChatConnection>,
        notification: &Notification,
    ) -> Result<Arc<dyn ChatConnection>> {
        let first = match self.send_once(connection.as_ref(), notification).await {
            Ok(()) => {
                record_sent(notification.kind);
                return Ok(connection);
            },
            Err(e) => e,
        };

        if !first.is_retryable() && connection.is_ready() {
            tracing::warn!(
                setup_id = %setup.id,
                channel_id = %notification.channel_id,
                error = %first,
                "Channel rejected message, not reconnecting"
            );
            metrics::counter!("webhook_dispatch_failures_total", "reason" => "channel_rejected")
                .increment(1);
            return Err(first);
        }

        tracing::warn!(setup_id = %setup.id, error = %first, "Send failed, reconnecting once");
        metrics::counter!("connection_failures_total", "operation" => "send").increment(1);
        self.registry.evict(&setup.id, &connection).await;

        let fresh = self.registry.get_or_create(setup).await?;
        match self.send_once(fresh.as_ref(), notification).await {
            Ok(()) => {
                record_sent(notification.kind);
                Ok(fresh)
            },
            Err(e) => {
                tracing::error!(
                    setup_id = %setup.id,
                    error = %e,
                    "Send failed after reconnect, giving up"
                );
                metrics::counter!("webhook_dispatch_failures_total", "reason" => "send")
                    .increment(1);
                self.registry.evict(&setup.id, &fresh).await;
                Err(e)
            },
        }
    }
}

fn record_sent(kind: NotificationKind) {
    let kind = match kind {
        NotificationKind::Event => "event",
        NotificationKind::Warning => "warning",
    };
    metrics::counter!("notifications_sent_total", "kind" => kind).increment(1);
}
