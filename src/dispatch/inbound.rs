//! Inbound webhook body decoding.

use crate::models::EventKind;
use serde::Deserialize;
use serde_json::Value;

/// Content type of form-encoded webhook deliveries.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Deserialize)]
struct FormBody {
    payload: String,
}

/// One inbound webhook delivery, decoded but not yet rendered.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Event kind from the request headers.
    pub kind: EventKind,
    /// Decoded JSON payload, or the reason the body could not be decoded.
    pub payload: std::result::Result<Value, String>,
}

impl InboundEvent {
    /// Builds an event from already-decoded JSON.
    #[must_use]
    pub const fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload: Ok(payload),
        }
    }

    /// Decodes a raw request.
    ///
    /// The event kind comes from `X-GitHub-Event`, else `X-Gitlab-Event`; a
    /// request carrying neither is kind `unknown` and renders nothing. Bodies
    /// are JSON, or form-encoded with the JSON in a `payload` field. A body
    /// that cannot be decoded is kept as an error so the tenant can be told.
    #[must_use]
    pub fn from_request(
        github_event: Option<&str>,
        gitlab_event: Option<&str>,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Self {
        let kind = EventKind::from_headers(github_event, gitlab_event)
            .unwrap_or_else(|| EventKind::Other("unknown".to_string()));

        let is_form = content_type.is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        });

        let payload = if is_form {
            decode_form(body)
        } else {
            serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {e}"))
        };

        Self { kind, payload }
    }
}

fn decode_form(body: &[u8]) -> std::result::Result<Value, String> {
    let form: FormBody =
        serde_urlencoded::from_bytes(body).map_err(|e| format!("invalid form body: {e}"))?;
    serde_json::from_str(&form.payload).map_err(|e| format!("invalid JSON in payload field: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_body() {
        let event = InboundEvent::from_request(
            Some("push"),
            None,
            Some("application/json"),
            br#"{"ref":"refs/heads/main"}"#,
        );
        assert_eq!(event.kind, EventKind::Push);
        assert_eq!(event.payload.unwrap(), json!({ "ref": "refs/heads/main" }));
    }

    #[test]
    fn test_form_body() {
        let event = InboundEvent::from_request(
            Some("ping"),
            None,
            Some("application/x-www-form-urlencoded; charset=utf-8"),
            b"payload=%7B%22zen%22%3A%22hi%22%7D",
        );
        assert_eq!(event.kind, EventKind::Ping);
        assert_eq!(event.payload.unwrap(), json!({ "zen": "hi" }));
    }

    #[test]
    fn test_gitlab_header() {
        let event = InboundEvent::from_request(None, Some("Push Hook"), None, b"{}");
        assert_eq!(event.kind, EventKind::GitLabPush);
    }

    #[test]
    fn test_missing_headers_is_unknown() {
        let event = InboundEvent::from_request(None, None, None, b"{}");
        assert_eq!(event.kind, EventKind::Other("unknown".to_string()));
    }

    #[test]
    fn test_garbage_body_kept_as_error() {
        let event = InboundEvent::from_request(Some("push"), None, None, b"not json");
        assert!(event.payload.unwrap_err().starts_with("invalid JSON body"));

        let event = InboundEvent::from_request(Some("push"), None, Some(FORM_CONTENT_TYPE), b"x=1");
        assert!(event.payload.unwrap_err().starts_with("invalid form body"));
    }
}
