//! Text shaping for chat messages.

/// Marker appended to truncated text.
pub const ELLIPSIS: char = '…';

/// Truncates `text` to at most `limit` characters.
///
/// Counts Unicode scalar values, never splits one, and ends a truncated
/// result with [`ELLIPSIS`] so that its length is exactly `limit`.
#[must_use]
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(limit - 1).collect();
    truncated.push(ELLIPSIS);
    truncated
}

/// Returns the first line of `text`, trimmed.
#[must_use]
pub fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

/// Returns the 7-character short form of a commit id.
#[must_use]
pub fn short_sha(sha: &str) -> &str {
    sha.char_indices().nth(7).map_or(sha, |(idx, _)| &sha[..idx])
}

/// Strips `refs/heads/` or `refs/tags/` from a git ref.
#[must_use]
pub fn short_ref(git_ref: &str) -> &str {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref)
}

/// Defuses mass mentions in user-controlled text.
///
/// A zero-width space after `@` keeps `@everyone` and `@here` readable
/// without pinging the channel.
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.replace("@everyone", "@\u{200B}everyone")
        .replace("@here", "@\u{200B}here")
}

/// Sanitizes, takes the first line and truncates in one step.
#[must_use]
pub fn inline(text: &str, limit: usize) -> String {
    truncate(&sanitize(first_line(text)), limit)
}
