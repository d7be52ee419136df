//! Event normalizer.
//!
//! Pure mapping from an upstream webhook event to chat notifications. Each
//! supported event kind has its own render function, looked up by
//! [`renderer`]; adding a kind means adding one function and one table row.
//!
//! Limits, in characters:
//!
//! | What | Limit |
//! |------|-------|
//! | PR / issue / release titles | [`TITLE_LIMIT`] |
//! | commit summaries | [`COMMIT_MESSAGE_LIMIT`] |
//! | whole message | [`MAX_MESSAGE_CHARS`] |
//!
//! At most [`MAX_LISTED_COMMITS`] commits are listed per push.

mod github;
mod gitlab;
pub mod text;

pub use github::review_glyph;

use crate::models::{EventKind, MAX_MESSAGE_CHARS, Notification};
use crate::{Error, Result};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Maximum characters of a title.
pub const TITLE_LIMIT: usize = 200;

/// Maximum characters of one commit summary.
pub const COMMIT_MESSAGE_LIMIT: usize = 100;

/// Maximum commits listed in a push message.
pub const MAX_LISTED_COMMITS: usize = 5;

/// Render function for one event kind: payload to message bodies.
pub type RenderFn = fn(&Value) -> Result<Vec<String>>;

/// Looks up the render function for an event kind.
///
/// Returns `None` for kinds that produce no notification (`ping` and
/// unknown kinds).
#[must_use]
pub fn renderer(kind: &EventKind) -> Option<RenderFn> {
    let render: RenderFn = match kind {
        EventKind::PullRequest => github::pull_request,
        EventKind::Push => github::push,
        EventKind::Issues => github::issues,
        EventKind::PullRequestReview => github::pull_request_review,
        EventKind::Release => github::release,
        EventKind::Create => github::create,
        EventKind::Fork => github::fork,
        EventKind::GitLabPush => gitlab::push,
        EventKind::GitLabMergeRequest => gitlab::merge_request,
        EventKind::GitLabIssue => gitlab::issue,
        EventKind::Ping | EventKind::Other(_) => return None,
    };
    Some(render)
}

/// Renders an event for one destination channel.
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if the payload lacks fields the event
/// kind requires.
pub fn render(kind: &EventKind, payload: &Value, channel_id: &str) -> Result<Vec<Notification>> {
    let Some(render) = renderer(kind) else {
        tracing::debug!(event = %kind, "No renderer for event kind");
        return Ok(Vec::new());
    };

    Ok(render(payload)?
        .into_iter()
        .map(|content| Notification::event(channel_id, text::truncate(&content, MAX_MESSAGE_CHARS)))
        .collect())
}

/// Renders an event, converting any failure into a warning notification.
///
/// Never fails and never panics past this boundary: a malformed payload, or
/// a panic inside a renderer, yields one warning for the same channel.
#[must_use]
pub fn render_or_warn(kind: &EventKind, payload: &Value, channel_id: &str) -> Vec<Notification> {
    let outcome = catch_unwind(AssertUnwindSafe(|| render(kind, payload, channel_id)));

    let reason = match outcome {
        Ok(Ok(notifications)) => return notifications,
        Ok(Err(Error::MalformedPayload { reason, .. })) => {
            metrics::counter!("malformed_payloads_total", "event" => kind.to_string())
                .increment(1);
            tracing::warn!(event = %kind, channel_id, reason = %reason, "Malformed webhook payload");
            reason
        },
        Ok(Err(e)) => {
            tracing::error!(event = %kind, channel_id, error = %e, "Failed to render event");
            e.to_string()
        },
        Err(_) => {
            tracing::error!(event = %kind, channel_id, "Renderer panicked");
            "internal rendering failure".to_string()
        },
    };

    vec![warning(kind, &reason, channel_id)]
}

/// Builds the user-visible warning for an event that could not be rendered.
#[must_use]
pub fn warning(kind: &EventKind, reason: &str, channel_id: &str) -> Notification {
    let content = format!("⚠️ Error processing {kind} event: {}", text::sanitize(reason));
    Notification::warning(channel_id, text::truncate(&content, MAX_MESSAGE_CHARS))
}

/// Unwraps a required field.
fn required<T>(value: Option<T>, event: &str, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::malformed(event, format!("missing {field}")))
}

/// Unwraps a required, non-blank string field.
fn required_str(value: Option<String>, event: &str, field: &str) -> Result<String> {
    required(value.filter(|v| !v.trim().is_empty()), event, field)
}

/// Converts a deserialization failure (wrong field type, non-object body).
fn invalid(event: &str, e: &serde_json::Error) -> Error {
    Error::malformed(event, format!("invalid payload: {e}"))
}
