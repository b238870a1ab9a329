use std::collections::BTreeMap;

use error_stack::Result;
use itertools::Itertools;

use super::{CheckContext, ConformityRule, RuleError, RuleOutcome, Severity, Violation};
use super::title::scope_is_allowed;
use crate::config::CommitsConfig;
use crate::conformity::conventional::{jira_project_key, parse_header, truncate_message};
use crate::gitlab::Commit;

const DISPLAY_TITLE_LEN: usize = 50;

pub struct CommitsRule {
    config: CommitsConfig,
}

impl CommitsRule {
    pub fn new(config: CommitsConfig) -> Self {
        Self { config }
    }
}

impl ConformityRule for CommitsRule {
    fn name(&self) -> &'static str {
        "Commit Messages"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<RuleOutcome, RuleError> {
        let mut too_long: Vec<&Commit> = Vec::new();
        let mut invalid_format: Vec<&Commit> = Vec::new();
        let mut invalid_types: BTreeMap<String, Vec<&Commit>> = BTreeMap::new();
        let mut invalid_scopes: BTreeMap<String, Vec<&Commit>> = BTreeMap::new();
        let mut missing_jira: Vec<&Commit> = Vec::new();
        let mut invalid_jira: BTreeMap<String, Vec<&Commit>> = BTreeMap::new();

        for commit in ctx.commits {
            let first_line = commit.message.lines().next().unwrap_or_default().trim();

            if first_line.chars().count() > self.config.max_length {
                too_long.push(commit);
            }

            match parse_header(&commit.message) {
                None => invalid_format.push(commit),
                Some(header) => {
                    if !self.config.conventional.types.contains(&header.commit_type) {
                        invalid_types.entry(header.commit_type).or_default().push(commit);
                    }
                    if let Some(scope) = &header.scope {
                        if !self.config.conventional.scopes.is_empty()
                            && !scope_is_allowed(scope, &self.config.conventional.scopes)
                        {
                            invalid_scopes.entry(scope.clone()).or_default().push(commit);
                        }
                    }
                }
            }

            if !self.config.jira.keys.is_empty() {
                match jira_project_key(&commit.message) {
                    None => missing_jira.push(commit),
                    Some(project) if !self.config.jira.keys.contains(&project) => {
                        invalid_jira.entry(project).or_default().push(commit);
                    }
                    Some(_) => {}
                }
            }
        }

        let mut violations = Vec::new();

        if !too_long.is_empty() {
            violations.push(aggregate(
                format!(
                    "{} commit(s) exceed max length of {} chars:",
                    too_long.len(),
                    self.config.max_length
                ),
                &too_long,
                "Keep commit messages concise and under the character limit",
            ));
        }

        if !invalid_format.is_empty() {
            violations.push(aggregate(
                format!(
                    "{} commit(s) have invalid Conventional Commit format:",
                    invalid_format.len()
                ),
                &invalid_format,
                "Use format: \n> ``` \n> type(scope?): description \n> ```\n> Example: \n`feat(auth): add login retry mechanism`\n\n",
            ));
        }

        for (invalid_type, commits) in &invalid_types {
            violations.push(aggregate(
                format!("{} commit(s) use invalid type '{invalid_type}':", commits.len()),
                commits,
                format!(
                    "Use one of the allowed types: {}",
                    self.config.conventional.types.iter().join(", ")
                ),
            ));
        }

        for (invalid_scope, commits) in &invalid_scopes {
            violations.push(aggregate(
                format!("{} commit(s) use invalid scope '{invalid_scope}':", commits.len()),
                commits,
                "Use a valid scope or omit it",
            ));
        }

        if !missing_jira.is_empty() {
            violations.push(aggregate(
                format!("{} commit(s) missing Jira issue tag:", missing_jira.len()),
                &missing_jira,
                "Include a Jira tag like [ABC-123] or ABC-123 \n> **Example**: \n> `fix(token): handle expired JWT refresh logic [SEC-456] `",
            ));
        }

        for (invalid_project, commits) in &invalid_jira {
            violations.push(aggregate(
                format!(
                    "{} commit(s) use invalid Jira project '{invalid_project}':",
                    commits.len()
                ),
                commits,
                format!("Use a valid Jira key such as {}", self.config.jira.keys[0]),
            ));
        }

        Ok(RuleOutcome::from_violations(violations))
    }
}

/// One violation per failure category, listing each offending commit by
/// its truncated title, short SHA and link.
fn aggregate(header: String, commits: &[&Commit], suggestion: impl Into<String>) -> Violation {
    let mut error = header;
    for commit in commits {
        let title = truncate_message(
            commit.message.lines().next().unwrap_or_default(),
            DISPLAY_TITLE_LEN,
        );
        error.push_str(&format!(
            "\n  - {title} ([{}]({}))",
            commit.short_id, commit.web_url
        ));
    }
    Violation::new(error, suggestion)
}
