use error_stack::Result;
use itertools::Itertools;

use super::{CheckContext, ConformityRule, RuleError, RuleOutcome, Severity, Violation};
use crate::config::BranchConfig;

pub struct BranchRule {
    config: BranchConfig,
}

impl BranchRule {
    pub fn new(config: BranchConfig) -> Self {
        Self { config }
    }
}

impl ConformityRule for BranchRule {
    fn name(&self) -> &'static str {
        "Branch Naming"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<RuleOutcome, RuleError> {
        let branch_name = &ctx.mr.source_branch;
        let mut violations = Vec::new();

        for forbidden in &self.config.forbidden_names {
            if branch_name.eq_ignore_ascii_case(forbidden) {
                violations.push(Violation::new(
                    format!("Branch name '{branch_name}' is not allowed"),
                    "Use a more descriptive branch name",
                ));
                break;
            }
        }

        if !self.config.allowed_prefixes.is_empty()
            && !self
                .config
                .allowed_prefixes
                .iter()
                .any(|prefix| branch_name.starts_with(prefix))
        {
            violations.push(Violation::new(
                format!(
                    "Branch should start with: {}",
                    self.config.allowed_prefixes.iter().join(", ")
                ),
                format!("Rename branch to start with '{}'", self.config.allowed_prefixes[0]),
            ));
        }

        Ok(RuleOutcome::from_violations(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformity::rules::test_support::{ContextFixture, merge_request, violations};

    fn check(branch: &str) -> Vec<Violation> {
        let rule = BranchRule::new(crate::config::BranchConfig {
            enabled: true,
            allowed_prefixes: vec!["feature/".to_string(), "bugfix/".to_string()],
            forbidden_names: vec!["master".to_string()],
        });
        let fixture = ContextFixture::new(merge_request("feat: x", "", branch));
        violations(rule.check(&fixture.ctx()).unwrap())
    }

    #[test]
    fn accepts_branches_with_allowed_prefix() {
        assert!(check("feature/login-retry").is_empty());
        assert!(check("bugfix/panic-on-empty").is_empty());
    }

    #[test]
    fn forbidden_names_match_case_insensitively() {
        let violations = check("MASTER");
        assert!(violations[0].error.contains("not allowed"));
    }

    #[test]
    fn requires_an_allowed_prefix() {
        let violations = check("quickfix");
        assert_eq!(violations.len(), 1);
        assert!(violations[0].error.contains("Branch should start with"));
        assert!(
            violations[0]
                .suggestion
                .as_deref()
                .unwrap()
                .contains("feature/")
        );
    }
}
