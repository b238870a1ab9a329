use core::fmt;

use enum_dispatch::enum_dispatch;
use error_stack::{Context, Result};
use serde::Serialize;

mod approvals;
mod branch;
mod commits;
mod description;
mod squash;
mod title;

pub use approvals::ApprovalsRule;
pub use branch::BranchRule;
pub use commits::CommitsRule;
pub use description::DescriptionRule;
pub use squash::SquashRule;
pub use title::TitleRule;

use crate::codeowners::PatternGroup;
use crate::config::RulesConfig;
use crate::gitlab::{Approvals, Commit, Member, MergeRequest};

/// Everything a rule may inspect about the merge request under check.
pub struct CheckContext<'a> {
    pub mr: &'a MergeRequest,
    pub commits: &'a [Commit],
    pub approvals: &'a Approvals,
    pub codeowners_groups: &'a [PatternGroup],
    pub members: &'a [Member],
}

/// Warnings annotate; errors block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One observed problem paired with how to fix it.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub error: String,
    pub suggestion: Option<String>,
}

impl Violation {
    pub fn new(error: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// A rule check either passes or names its violations; rule bugs and bad
/// rule configuration surface as `RuleError` instead.
#[derive(Debug)]
pub enum RuleOutcome {
    Passed,
    Failed(Vec<Violation>),
}

impl RuleOutcome {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            RuleOutcome::Passed
        } else {
            RuleOutcome::Failed(violations)
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, RuleOutcome::Passed)
    }
}

#[derive(Debug)]
pub enum RuleError {
    InvalidPattern(String),
}

impl Context for RuleError {}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::InvalidPattern(pattern) => write!(f, "invalid pattern '{pattern}'"),
        }
    }
}

#[enum_dispatch]
pub trait ConformityRule {
    fn name(&self) -> &'static str;
    fn severity(&self) -> Severity;
    fn check(&self, ctx: &CheckContext<'_>) -> Result<RuleOutcome, RuleError>;
}

/// The closed set of rule families, dispatched uniformly.
#[enum_dispatch(ConformityRule)]
pub enum Rule {
    TitleRule,
    DescriptionRule,
    BranchRule,
    CommitsRule,
    ApprovalsRule,
    SquashRule,
}

/// Instantiate the enabled rules from configuration, in a fixed order.
pub fn build_rules(config: &RulesConfig) -> Vec<Rule> {
    let mut rules = Vec::new();

    if config.title.enabled {
        rules.push(Rule::from(TitleRule::new(config.title.clone())));
    }
    if config.description.enabled {
        rules.push(Rule::from(DescriptionRule::new(config.description.clone())));
    }
    if config.branch.enabled {
        rules.push(Rule::from(BranchRule::new(config.branch.clone())));
    }
    if config.commits.enabled {
        rules.push(Rule::from(CommitsRule::new(config.commits.clone())));
    }
    if config.approvals.enabled {
        rules.push(Rule::from(ApprovalsRule::new(config.approvals.clone())));
    }
    if config.squash.enabled {
        rules.push(Rule::from(SquashRule::new(config.squash.clone())));
    }

    rules
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;

    #[test]
    fn builds_only_enabled_rules() {
        let mut config = RulesConfig::default();
        assert!(build_rules(&config).is_empty());

        config.title.enabled = true;
        config.squash.enabled = true;
        let rules = build_rules(&config);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name(), "Title Validation");
        assert_eq!(rules[1].name(), "Squash enforce");
    }

    #[test]
    fn severity_orders_errors_above_warnings() {
        assert!(Severity::Error > Severity::Warning);
    }
}
