//! GitHub webhook renderers.
//!
//! Each renderer deserializes only the fields it needs, checks the required
//! ones explicitly and formats one message. Identity fields (numbers,
//! titles, refs, repository names) are required; actor names fall back to
//! `unknown`.

use super::text::{inline, sanitize, short_ref, short_sha};
use super::{COMMIT_MESSAGE_LIMIT, MAX_LISTED_COMMITS, TITLE_LIMIT, required, required_str};
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct User {
    login: Option<String>,
}

impl User {
    fn name(user: Option<&Self>) -> &str {
        user.and_then(|u| u.login.as_deref())
            .filter(|login| !login.is_empty())
            .unwrap_or(UNKNOWN)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Repository {
    full_name: Option<String>,
    name: Option<String>,
    html_url: Option<String>,
}

impl Repository {
    fn display_name(&self) -> Option<String> {
        self.full_name
            .clone()
            .or_else(|| self.name.clone())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PullRequest {
    number: Option<u64>,
    title: Option<String>,
    html_url: Option<String>,
    user: Option<User>,
    merged: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PullRequestEvent {
    action: Option<String>,
    pull_request: Option<PullRequest>,
}

/// Renders `pull_request`.
pub fn pull_request(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "pull_request";
    let event = PullRequestEvent::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let action = required_str(event.action, EVENT, "action")?;
    let pr = required(event.pull_request, EVENT, "pull_request")?;
    let number = required(pr.number, EVENT, "pull_request.number")?;
    let title = required_str(pr.title.clone(), EVENT, "pull_request.title")?;
    let author = User::name(pr.user.as_ref());

    // GitHub reports a merge as action "closed" with merged = true.
    let action = if action == "closed" && pr.merged == Some(true) {
        "merged".to_string()
    } else {
        action
    };

    let mut message = format!(
        "📣 PR #{number} **{}** ({action}) by **{}**",
        inline(&title, TITLE_LIMIT),
        sanitize(author)
    );
    if let Some(url) = pr.html_url.as_deref().filter(|u| !u.is_empty()) {
        let _ = write!(message, "\n{url}");
    }
    Ok(vec![message])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct Commit {
    pub(super) id: Option<String>,
    pub(super) message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Pusher {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    deleted: bool,
    forced: bool,
    repository: Option<Repository>,
    pusher: Option<Pusher>,
    sender: Option<User>,
    commits: Vec<Commit>,
    compare: Option<String>,
}

/// Formats a push (or a ref deletion) shared by GitHub and GitLab.
pub(super) fn format_push(
    git_ref: &str,
    repo: &str,
    pusher: &str,
    deleted: bool,
    commits: &[Commit],
) -> String {
    let short = short_ref(git_ref);
    let repo = sanitize(repo);
    let pusher = sanitize(pusher);

    if deleted {
        let what = if git_ref.starts_with("refs/tags/") {
            "Tag"
        } else {
            "Branch"
        };
        return format!("🗑️ {what} deleted: `{short}` in **{repo}** by **{pusher}**");
    }

    let mut message = format!("🚀 Push to `{short}` in **{repo}** by **{pusher}**");
    for commit in commits.iter().take(MAX_LISTED_COMMITS) {
        let summary = commit
            .message
            .as_deref()
            .map(|m| inline(m, COMMIT_MESSAGE_LIMIT))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "(no message)".to_string());
        let sha = commit.id.as_deref().map_or("0000000", short_sha);
        let _ = write!(message, "\n- {summary} ({sha})");
    }
    if commits.len() > MAX_LISTED_COMMITS {
        let _ = write!(
            message,
            "\n…and {} more commits",
            commits.len() - MAX_LISTED_COMMITS
        );
    }
    message
}

/// Renders `push`, or a "deleted" message when the push removed the ref.
pub fn push(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "push";
    let event = PushEvent::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let git_ref = required_str(event.git_ref, EVENT, "ref")?;
    let repo = required(
        event.repository.as_ref().and_then(Repository::display_name),
        EVENT,
        "repository.full_name",
    )?;
    let pusher = event
        .pusher
        .as_ref()
        .and_then(|p| p.name.as_deref())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| User::name(event.sender.as_ref()));

    let mut message = format_push(&git_ref, &repo, pusher, event.deleted, &event.commits);
    if event.forced && !event.deleted {
        message = message.replacen("🚀 Push", "🚀 Force-push", 1);
    }
    if !event.deleted && event.commits.len() > MAX_LISTED_COMMITS {
        if let Some(compare) = event.compare.as_deref().filter(|c| !c.is_empty()) {
            let _ = write!(message, "\n{compare}");
        }
    }
    Ok(vec![message])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Issue {
    number: Option<u64>,
    title: Option<String>,
    html_url: Option<String>,
    user: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IssuesEvent {
    action: Option<String>,
    issue: Option<Issue>,
    sender: Option<User>,
}

/// Renders `issues`.
pub fn issues(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "issues";
    let event = IssuesEvent::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let action = required_str(event.action, EVENT, "action")?;
    let issue = required(event.issue, EVENT, "issue")?;
    let number = required(issue.number, EVENT, "issue.number")?;
    let title = required_str(issue.title, EVENT, "issue.title")?;
    // The actor of a close or label is the sender, not the issue author.
    let actor = if action == "opened" {
        User::name(issue.user.as_ref())
    } else {
        User::name(event.sender.as_ref().or(issue.user.as_ref()))
    };

    let mut message = format!(
        "🐛 Issue #{number} **{}** ({action}) by **{}**",
        inline(&title, TITLE_LIMIT),
        sanitize(actor)
    );
    if let Some(url) = issue.html_url.as_deref().filter(|u| !u.is_empty()) {
        let _ = write!(message, "\n{url}");
    }
    Ok(vec![message])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Review {
    state: Option<String>,
    html_url: Option<String>,
    user: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReviewEvent {
    review: Option<Review>,
    pull_request: Option<PullRequest>,
}

/// Maps a review state to its indicator glyph.
#[must_use]
pub fn review_glyph(state: &str) -> &'static str {
    match state.to_lowercase().as_str() {
        "approved" => "✅",
        "changes_requested" => "❌",
        "commented" => "💬",
        "dismissed" => "🚫",
        _ => "📝",
    }
}

/// Renders `pull_request_review`.
pub fn pull_request_review(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "pull_request_review";
    let event = ReviewEvent::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let review = required(event.review, EVENT, "review")?;
    let state = review
        .state
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("reviewed");
    let pr = required(event.pull_request, EVENT, "pull_request")?;
    let number = required(pr.number, EVENT, "pull_request.number")?;
    let title = required_str(pr.title, EVENT, "pull_request.title")?;
    let reviewer = User::name(review.user.as_ref());

    let mut message = format!(
        "{} Review on PR #{number} **{}**: {} by **{}**",
        review_glyph(state),
        inline(&title, TITLE_LIMIT),
        sanitize(&state.to_lowercase().replace('_', " ")),
        sanitize(reviewer)
    );
    if let Some(url) = review
        .html_url
        .as_deref()
        .or(pr.html_url.as_deref())
        .filter(|u| !u.is_empty())
    {
        let _ = write!(message, "\n{url}");
    }
    Ok(vec![message])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Release {
    tag_name: Option<String>,
    name: Option<String>,
    html_url: Option<String>,
    prerelease: bool,
    author: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReleaseEvent {
    action: Option<String>,
    release: Option<Release>,
}

/// Renders `release`.
pub fn release(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "release";
    let event = ReleaseEvent::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let release = required(event.release, EVENT, "release")?;
    let tag = required_str(release.tag_name, EVENT, "release.tag_name")?;
    let name = release
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| tag.clone());
    let action = event
        .action
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "published".to_string());
    let author = User::name(release.author.as_ref());

    let mut message = format!(
        "🎉 Release **{}** (`{}`) {action} by **{}**",
        inline(&name, TITLE_LIMIT),
        sanitize(&tag),
        sanitize(author)
    );
    if release.prerelease {
        message.push_str(" [pre-release]");
    }
    if let Some(url) = release.html_url.as_deref().filter(|u| !u.is_empty()) {
        let _ = write!(message, "\n{url}");
    }
    Ok(vec![message])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateEvent {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    ref_type: Option<String>,
    repository: Option<Repository>,
    sender: Option<User>,
}

/// Renders `create` (branch or tag).
pub fn create(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "create";
    let event = CreateEvent::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let git_ref = required_str(event.git_ref, EVENT, "ref")?;
    let ref_type = required_str(event.ref_type, EVENT, "ref_type")?;
    let (glyph, label) = match ref_type.as_str() {
        "tag" => ("🏷️", "Tag"),
        "branch" => ("🌿", "Branch"),
        _ => ("🌿", "Ref"),
    };
    let actor = User::name(event.sender.as_ref());

    let mut message = format!("{glyph} {label} created: `{}`", sanitize(short_ref(&git_ref)));
    if let Some(repo) = event.repository.as_ref().and_then(Repository::display_name) {
        let _ = write!(message, " in **{}**", sanitize(&repo));
    }
    let _ = write!(message, " by **{}**", sanitize(actor));
    Ok(vec![message])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Forkee {
    full_name: Option<String>,
    html_url: Option<String>,
    owner: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForkEvent {
    forkee: Option<Forkee>,
    repository: Option<Repository>,
}

/// Renders `fork`.
pub fn fork(payload: &Value) -> Result<Vec<String>> {
    const EVENT: &str = "fork";
    let event = ForkEvent::deserialize(payload).map_err(|e| super::invalid(EVENT, &e))?;

    let forkee = required(event.forkee, EVENT, "forkee")?;
    let repo = required(
        event.repository.as_ref().and_then(Repository::display_name),
        EVENT,
        "repository.full_name",
    )?;
    let owner = forkee
        .owner
        .as_ref()
        .and_then(|o| o.login.clone())
        .or_else(|| {
            forkee
                .full_name
                .as_deref()
                .and_then(|n| n.split('/').next())
                .map(str::to_string)
        })
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let url = forkee
        .html_url
        .or_else(|| {
            event
                .repository
                .as_ref()
                .and_then(|r| r.html_url.clone())
        })
        .unwrap_or_default();

    let mut message = format!(
        "🍴 **{}** forked by **{}**",
        sanitize(&repo),
        sanitize(&owner)
    );
    if !url.is_empty() {
        let _ = write!(message, "\n{url}");
    }
    Ok(vec![message])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    fn one(result: Result<Vec<String>>) -> String {
        let mut messages = result.unwrap();
        assert_eq!(messages.len(), 1);
        messages.remove(0)
    }

    #[test]
    fn test_pull_request_format() {
        let message = one(pull_request(&json!({
            "action": "opened",
            "pull_request": {
                "number": 42,
                "title": "Add relay",
                "html_url": "https://github.com/octo/repo/pull/42",
                "user": { "login": "alice" }
            }
        })));
        assert_eq!(
            message,
            "📣 PR #42 **Add relay** (opened) by **alice**\nhttps://github.com/octo/repo/pull/42"
        );
    }

    #[test]
    fn test_pull_request_merged_and_unknown_author() {
        let message = one(pull_request(&json!({
            "action": "closed",
            "pull_request": { "number": 1, "title": "t", "merged": true }
        })));
        assert!(message.contains("(merged)"));
        assert!(message.contains("by **unknown**"));
    }

    #[test]
    fn test_pull_request_missing_fields() {
        let err = pull_request(&json!({ "action": "opened" })).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert!(err.to_string().contains("pull_request"));

        let err = pull_request(&json!({
            "action": "opened",
            "pull_request": { "title": "no number" }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("pull_request.number"));
    }

    #[test]
    fn test_pull_request_wrong_type_is_malformed() {
        let err = pull_request(&json!({
            "action": "opened",
            "pull_request": { "number": "forty-two", "title": "t" }
        }))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn test_pull_request_title_truncated() {
        let message = one(pull_request(&json!({
            "action": "opened",
            "pull_request": { "number": 7, "title": "t".repeat(300) }
        })));
        let title = message
            .split("**")
            .nth(1)
            .unwrap();
        assert_eq!(title.chars().count(), TITLE_LIMIT);
    }

    #[test]
    fn test_push_uses_sender_when_pusher_missing() {
        let message = one(push(&json!({
            "ref": "refs/heads/main",
            "repository": { "full_name": "octo/repo" },
            "sender": { "login": "bob" },
            "commits": []
        })));
        assert_eq!(message, "🚀 Push to `main` in **octo/repo** by **bob**");
    }

    #[test]
    fn test_push_forced() {
        let message = one(push(&json!({
            "ref": "refs/heads/main",
            "forced": true,
            "repository": { "full_name": "octo/repo" },
            "pusher": { "name": "bob" }
        })));
        assert!(message.starts_with("🚀 Force-push"));
    }

    #[test]
    fn test_push_tag_deleted() {
        let message = one(push(&json!({
            "ref": "refs/tags/v1.0",
            "deleted": true,
            "repository": { "full_name": "octo/repo" },
            "pusher": { "name": "bob" }
        })));
        assert!(message.starts_with("🗑️ Tag deleted: `v1.0`"));
    }

    #[test]
    fn test_push_requires_repository() {
        let err = push(&json!({ "ref": "refs/heads/main" })).unwrap_err();
        assert!(err.to_string().contains("repository.full_name"));
    }

    #[test]
    fn test_issues_actor() {
        let message = one(issues(&json!({
            "action": "closed",
            "issue": { "number": 3, "title": "Crash", "user": { "login": "alice" } },
            "sender": { "login": "carol" }
        })));
        assert_eq!(message, "🐛 Issue #3 **Crash** (closed) by **carol**");
    }

    #[test]
    fn test_review_glyphs() {
        assert_eq!(review_glyph("approved"), "✅");
        assert_eq!(review_glyph("APPROVED"), "✅");
        assert_eq!(review_glyph("changes_requested"), "❌");
        assert_eq!(review_glyph("commented"), "💬");
        assert_eq!(review_glyph("dismissed"), "🚫");
        assert_eq!(review_glyph("something_new"), "📝");
    }

    #[test]
    fn test_review_without_state_uses_generic_indicator() {
        let message = one(pull_request_review(&json!({
            "review": { "user": { "login": "dave" } },
            "pull_request": { "number": 9, "title": "Refactor" }
        })));
        assert_eq!(message, "📝 Review on PR #9 **Refactor**: reviewed by **dave**");

        let blank = one(pull_request_review(&json!({
            "review": { "state": "  ", "user": { "login": "dave" } },
            "pull_request": { "number": 9, "title": "Refactor" }
        })));
        assert_eq!(blank, message);
    }

    #[test]
    fn test_review_format() {
        let message = one(pull_request_review(&json!({
            "review": { "state": "changes_requested", "user": { "login": "dave" } },
            "pull_request": { "number": 9, "title": "Refactor", "html_url": "https://x/9" }
        })));
        assert_eq!(
            message,
            "❌ Review on PR #9 **Refactor**: changes requested by **dave**\nhttps://x/9"
        );
    }

    #[test]
    fn test_release_prerelease() {
        let message = one(release(&json!({
            "action": "published",
            "release": { "tag_name": "v2.0.0-rc1", "prerelease": true, "author": { "login": "eve" } }
        })));
        assert!(message.starts_with("🎉 Release **v2.0.0-rc1** (`v2.0.0-rc1`) published by **eve**"));
        assert!(message.contains("[pre-release]"));
    }

    #[test]
    fn test_release_requires_tag() {
        assert!(release(&json!({ "release": {} })).is_err());
    }

    #[test]
    fn test_create_branch_and_tag() {
        let branch = one(create(&json!({
            "ref": "feature/x",
            "ref_type": "branch",
            "repository": { "full_name": "octo/repo" },
            "sender": { "login": "frank" }
        })));
        assert_eq!(
            branch,
            "🌿 Branch created: `feature/x` in **octo/repo** by **frank**"
        );

        let tag = one(create(&json!({ "ref": "v1", "ref_type": "tag" })));
        assert_eq!(tag, "🏷️ Tag created: `v1` by **unknown**");
    }

    #[test]
    fn test_fork() {
        let message = one(fork(&json!({
            "forkee": {
                "full_name": "grace/repo",
                "html_url": "https://github.com/grace/repo",
                "owner": { "login": "grace" }
            },
            "repository": { "full_name": "octo/repo" }
        })));
        assert_eq!(
            message,
            "🍴 **octo/repo** forked by **grace**\nhttps://github.com/grace/repo"
        );
    }

    #[test]
    fn test_fork_requires_forkee() {
        let err = fork(&json!({ "repository": { "full_name": "octo/repo" } })).unwrap_err();
        assert!(err.to_string().contains("forkee"));
    }
}
