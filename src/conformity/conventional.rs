use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Conventional Commits 1.0.0 header.
    static ref HEADER_REGEX: Regex = Regex::new(r"^(\w*)(\(([^)]+)\))?(!)?: (.*)$").unwrap();
    /// Jira issue reference with a permissive project key ([A-Z0-9]+).
    static ref JIRA_REGEX: Regex = Regex::new(r".*\s\[?([A-Z0-9]+)-[1-9]\d*\]?.*").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalHeader {
    pub commit_type: String,
    pub scope: Option<String>,
    pub breaking: bool,
    pub description: String,
}

/// Parse the first line of `message` as a Conventional Commits header.
pub fn parse_header(message: &str) -> Option<ConventionalHeader> {
    let header = message.trim_start_matches('\n').lines().next().unwrap_or_default();
    HEADER_REGEX.captures(header).map(|captures| ConventionalHeader {
        commit_type: captures[1].to_string(),
        scope: captures.get(3).map(|scope| scope.as_str().to_string()),
        breaking: captures.get(4).is_some(),
        description: captures[5].to_string(),
    })
}

/// The Jira project key referenced in `text`, if any.
pub fn jira_project_key(text: &str) -> Option<String> {
    JIRA_REGEX
        .captures(text)
        .map(|captures| captures[1].to_string())
}

/// Shorten a commit title for display in aggregated failure lists.
pub fn truncate_message(message: &str, max_len: usize) -> String {
    let message = message.trim();
    if message.chars().count() <= max_len {
        message.to_string()
    } else {
        let truncated: String = message.chars().take(max_len).collect();
        format!("{truncated}...")
    }
}
