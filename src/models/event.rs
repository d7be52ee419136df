//! Inbound webhook event kinds.

use std::fmt;

/// Header carrying the GitHub event name.
pub const GITHUB_EVENT_HEADER: &str = "x-github-event";

/// Header carrying the GitLab event name.
pub const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";

/// Event kind of an inbound webhook delivery.
///
/// Kinds without a renderer are kept as [`EventKind::Other`] so they can be
/// logged and then ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// GitHub `pull_request`.
    PullRequest,
    /// GitHub `push`.
    Push,
    /// GitHub `issues`.
    Issues,
    /// GitHub `pull_request_review`.
    PullRequestReview,
    /// GitHub `release`.
    Release,
    /// GitHub `create` (branch or tag).
    Create,
    /// GitHub `fork`.
    Fork,
    /// GitHub `ping`, sent once when a hook is installed.
    Ping,
    /// GitLab `Push Hook`.
    GitLabPush,
    /// GitLab `Merge Request Hook`.
    GitLabMergeRequest,
    /// GitLab `Issue Hook`.
    GitLabIssue,
    /// Any other event name.
    Other(String),
}

impl EventKind {
    /// Parses a GitHub event header value.
    #[must_use]
    pub fn from_github(name: &str) -> Self {
        match name.trim() {
            "pull_request" => Self::PullRequest,
            "push" => Self::Push,
            "issues" => Self::Issues,
            "pull_request_review" => Self::PullRequestReview,
            "release" => Self::Release,
            "create" => Self::Create,
            "fork" => Self::Fork,
            "ping" => Self::Ping,
            other => Self::Other(other.to_string()),
        }
    }

    /// Parses a GitLab event header value.
    #[must_use]
    pub fn from_gitlab(name: &str) -> Self {
        match name.trim() {
            "Push Hook" => Self::GitLabPush,
            "Merge Request Hook" => Self::GitLabMergeRequest,
            "Issue Hook" => Self::GitLabIssue,
            other => Self::Other(other.to_string()),
        }
    }

    /// Resolves the event kind from the two platform headers.
    ///
    /// GitHub wins if both are present. Returns `None` if neither is.
    #[must_use]
    pub fn from_headers(github: Option<&str>, gitlab: Option<&str>) -> Option<Self> {
        github
            .map(Self::from_github)
            .or_else(|| gitlab.map(Self::from_gitlab))
    }

    /// Returns the event name as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PullRequest => "pull_request",
            Self::Push => "push",
            Self::Issues => "issues",
            Self::PullRequestReview => "pull_request_review",
            Self::Release => "release",
            Self::Create => "create",
            Self::Fork => "fork",
            Self::Ping => "ping",
            Self::GitLabPush => "Push Hook",
            Self::GitLabMergeRequest => "Merge Request Hook",
            Self::GitLabIssue => "Issue Hook",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_names_roundtrip() {
        for name in [
            "pull_request",
            "push",
            "issues",
            "pull_request_review",
            "release",
            "create",
            "fork",
            "ping",
        ] {
            assert_eq!(EventKind::from_github(name).as_str(), name);
        }
    }

    #[test]
    fn test_unknown_names_are_preserved() {
        let kind = EventKind::from_github("workflow_run");
        assert_eq!(kind, EventKind::Other("workflow_run".to_string()));
        assert_eq!(kind.to_string(), "workflow_run");
    }

    #[test]
    fn test_from_headers_prefers_github() {
        assert_eq!(
            EventKind::from_headers(Some("push"), Some("Push Hook")),
            Some(EventKind::Push)
        );
        assert_eq!(
            EventKind::from_headers(None, Some("Merge Request Hook")),
            Some(EventKind::GitLabMergeRequest)
        );
        assert_eq!(EventKind::from_headers(None, None), None);
    }
}
