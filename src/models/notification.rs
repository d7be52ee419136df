//! Rendered chat notifications.

use serde::Serialize;

/// Maximum length of one chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// What a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A rendered upstream event.
    Event,
    /// A payload that could not be rendered.
    Warning,
}

/// One message destined for a tenant's chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Destination channel id.
    pub channel_id: String,
    /// Message text, at most [`MAX_MESSAGE_CHARS`] characters.
    pub content: String,
    /// Event or warning.
    pub kind: NotificationKind,
}

impl Notification {
    /// Creates an event notification.
    #[must_use]
    pub fn event(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
            kind: NotificationKind::Event,
        }
    }

    /// Creates a warning notification.
    #[must_use]
    pub fn warning(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
            kind: NotificationKind::Warning,
        }
    }
}
