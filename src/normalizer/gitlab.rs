//! GitLab webhook renderers.

use super::github::{Commit, format_push};
use super::text::{inline, sanitize};
use super::{TITLE_LIMIT, required, required_str};
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;

/// `after` of a push that removed the ref.
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Project {
    path_with_namespace: Option<String>,
    name: Option<String>,
}

impl Project {
    fn display_name(&self) -> Option<String> {
        self.path_with_namespace
            .clone()
            .or_else(|| self.name.clone())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GitLabUser {
    username: Option<String>,
    name: Option<String>,
}

fn user_name(user: Option<&GitLabUser>) -> &str {
    user.and_then(|u| u.username.as_deref().or(u.name.as_deref()))
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown")
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PushHook {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    after: Option<String>,
    user_name: Option<String>,
    user_username: Option<String>,
    project: Option<Project>,
    commits: Vec<Commit>,
}

/// Renders `Push Hook`.
pub fn push(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "Push Hook";
    let event = PushHook::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let git_ref = required_str(event.git_ref, EVENT, "ref")?;
    let repo = required(
        event.project.as_ref().and_then(Project::display_name),
        EVENT,
        "project.path_with_namespace",
    )?;
    let pusher = event
        .user_username
        .as_deref()
        .or(event.user_name.as_deref())
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown");
    let deleted = event.after.as_deref() == Some(NULL_SHA);

    Ok(vec![format_push(&git_ref, &repo, pusher, deleted, &event.commits)])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectAttributes {
    iid: Option<u64>,
    title: Option<String>,
    url: Option<String>,
    action: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectHook {
    object_attributes: Option<ObjectAttributes>,
    user: Option<GitLabUser>,
}

fn action_of(attributes: &ObjectAttributes) -> String {
    attributes
        .action
        .clone()
        .or_else(|| attributes.state.clone())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "updated".to_string())
}

/// Renders `Merge Request Hook`.
pub fn merge_request(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "Merge Request Hook";
    let event = ObjectHook::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let attributes = required(event.object_attributes, EVENT, "object_attributes")?;
    let iid = required(attributes.iid, EVENT, "object_attributes.iid")?;
    let title = required_str(attributes.title.clone(), EVENT, "object_attributes.title")?;
    let action = action_of(&attributes);

    let mut message = format!(
        "📣 MR !{iid} **{}** ({action}) by **{}**",
        inline(&title, TITLE_LIMIT),
        sanitize(user_name(event.user.as_ref()))
    );
    if let Some(url) = attributes.url.as_deref().filter(|u| !u.is_empty()) {
        let _ = write!(message, "\n{url}");
    }
    Ok(vec![message])
}

/// Renders `Issue Hook`.
pub fn issue(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "Issue Hook";
    let event = ObjectHook::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let attributes = required(event.object_attributes, EVENT, "object_attributes")?;
    let iid = required(attributes.iid, EVENT, "object_attributes.iid")?;
    let title = required_str(attributes.title.clone(), EVENT, "object_attributes.title")?;
    let action = action_of(&attributes);

    let mut message = format!(
        "🐛 Issue #{iid} **{}** ({action}) by **{}**",
        inline(&title, TITLE_LIMIT),
        sanitize(user_name(event.user.as_ref()))
    );
    if let Some(url) = attributes.url.as_deref().filter(|u| !u.is_empty()) {
        let _ = write!(message, "\n{url}");
    }
    Ok(vec![message])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_hook() {
        let messages = push(&json!({
            "ref": "refs/heads/main",
            "after": "abcdef1234567890abcdef1234567890abcdef12",
            "user_username": "hana",
            "project": { "path_with_namespace": "group/project" },
            "commits": [{ "id": "1234567890", "message": "Initial commit\n\nbody" }]
        }))
        .unwrap();
        assert_eq!(
            messages,
            vec!["🚀 Push to `main` in **group/project** by **hana**\n- Initial commit (1234567)"]
        );
    }

    #[test]
    fn test_push_hook_branch_removed() {
        let messages = push(&json!({
            "ref": "refs/heads/gone",
            "after": NULL_SHA,
            "user_name": "Hana",
            "project": { "path_with_namespace": "group/project" },
            "commits": []
        }))
        .unwrap();
        assert!(messages[0].starts_with("🗑️ Branch deleted: `gone`"));
    }

    #[test]
    fn test_push_hook_requires_project() {
        assert!(push(&json!({ "ref": "refs/heads/main" })).is_err());
    }

    #[test]
    fn test_merge_request_hook() {
        let messages = merge_request(&json!({
            "user": { "username": "ivan" },
            "object_attributes": {
                "iid": 5,
                "title": "Add CI",
                "url": "https://gitlab.com/g/p/-/merge_requests/5",
                "action": "open"
            }
        }))
        .unwrap();
        assert_eq!(
            messages[0],
            "📣 MR !5 **Add CI** (open) by **ivan**\nhttps://gitlab.com/g/p/-/merge_requests/5"
        );
    }

    #[test]
    fn test_issue_hook_falls_back_to_state() {
        let messages = issue(&json!({
            "object_attributes": { "iid": 8, "title": "Bug", "state": "closed" }
        }))
        .unwrap();
        assert_eq!(messages[0], "🐛 Issue #8 **Bug** (closed) by **unknown**");
    }

    #[test]
    fn test_issue_hook_requires_iid() {
        let err = issue(&json!({ "object_attributes": { "title": "Bug" } })).unwrap_err();
        assert!(err.to_string().contains("object_attributes.iid"));
    }
}
