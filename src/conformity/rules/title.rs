use error_stack::Result;
use itertools::Itertools;
use regex::Regex;

use super::{CheckContext, ConformityRule, RuleError, RuleOutcome, Severity, Violation};
use crate::config::TitleConfig;
use crate::conformity::conventional::{jira_project_key, parse_header};

pub struct TitleRule {
    config: TitleConfig,
}

impl TitleRule {
    pub fn new(config: TitleConfig) -> Self {
        Self { config }
    }
}

impl ConformityRule for TitleRule {
    fn name(&self) -> &'static str {
        "Title Validation"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<RuleOutcome, RuleError> {
        let title = &ctx.mr.title;
        let mut violations = Vec::new();

        let length = title.chars().count();
        if length < self.config.min_length {
            violations.push(Violation::new(
                format!("Title too short (minimum {} characters)", self.config.min_length),
                "Provide a more descriptive title",
            ));
        }
        if length > self.config.max_length {
            violations.push(Violation::new(
                format!("Title too long (maximum {} characters)", self.config.max_length),
                "Shorten the title while keeping it descriptive",
            ));
        }

        let title_lower = title.to_lowercase();
        for word in &self.config.forbidden_words {
            if title_lower.contains(&word.to_lowercase()) {
                violations.push(Violation::new(
                    format!("Title contains forbidden word: {word}"),
                    "Remove or replace the forbidden word",
                ));
                break;
            }
        }

        match parse_header(title) {
            None => violations.push(Violation::new(
                format!("Invalid Conventional Commit format in title: {title:?}"),
                "Use format:  \n> ```  \n> type(scope?): description  \n> ```\n> Example:  \n`feat(auth): add login retry mechanism`\n\n",
            )),
            Some(header) => {
                if !self.config.conventional.types.contains(&header.commit_type) {
                    violations.push(Violation::new(
                        format!(
                            "Invalid type {:?}: allowed types are {:?}",
                            header.commit_type, self.config.conventional.types
                        ),
                        format!(
                            "Use one of the allowed types: {}",
                            self.config.conventional.types.iter().join(", ")
                        ),
                    ));
                }

                if let Some(scope) = &header.scope {
                    if !self.config.conventional.scopes.is_empty()
                        && !scope_is_allowed(scope, &self.config.conventional.scopes)
                    {
                        violations.push(Violation::new(
                            format!(
                                "Invalid scope {:?}: allowed scopes are {:?}",
                                scope, self.config.conventional.scopes
                            ),
                            "Use a valid scope or omit it",
                        ));
                    }
                }
            }
        }

        if !self.config.jira.keys.is_empty() {
            match jira_project_key(title) {
                None => violations.push(Violation::new(
                    format!("No Jira issue tag found in title: {title:?}"),
                    "Include a Jira tag like [ABC-123] or ABC-123  \n> **Example**:  \n> `fix(token): handle expired JWT refresh logic [SEC-456] `",
                )),
                Some(project) if !self.config.jira.keys.contains(&project) => {
                    violations.push(Violation::new(
                        format!(
                            "Jira project {:?} is not valid. Allowed: {:?}",
                            project, self.config.jira.keys
                        ),
                        format!("Use a valid Jira key such as {}", self.config.jira.keys[0]),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(RuleOutcome::from_violations(violations))
    }
}

pub(crate) fn scope_is_allowed(scope: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|pattern| {
        Regex::new(pattern)
            .map(|regex| regex.is_match(scope))
            .unwrap_or(false)
    })
}
