use error_stack::Result;

use super::{CheckContext, ConformityRule, RuleError, RuleOutcome, Severity, Violation};
use crate::config::DescriptionConfig;

pub struct DescriptionRule {
    config: DescriptionConfig,
}

impl DescriptionRule {
    pub fn new(config: DescriptionConfig) -> Self {
        Self { config }
    }
}

impl ConformityRule for DescriptionRule {
    fn name(&self) -> &'static str {
        "Description Validation"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<RuleOutcome, RuleError> {
        let description = ctx.mr.description.as_deref().unwrap_or_default().trim();
        let mut violations = Vec::new();

        if self.config.required && description.is_empty() {
            violations.push(Violation::new(
                "Description is required",
                "Add a description explaining the changes in this merge request",
            ));
        }

        if !description.is_empty() && description.chars().count() < self.config.min_length {
            violations.push(Violation::new(
                format!(
                    "Description too short (minimum {} characters)",
                    self.config.min_length
                ),
                "Provide more details about the changes",
            ));
        }

        Ok(RuleOutcome::from_violations(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformity::rules::test_support::{ContextFixture, merge_request, violations};

    fn check(description: &str) -> Vec<Violation> {
        let rule = DescriptionRule::new(crate::config::DescriptionConfig {
            enabled: true,
            required: true,
            min_length: 20,
        });
        let fixture = ContextFixture::new(merge_request("feat: x", description, "feature/x"));
        violations(rule.check(&fixture.ctx()).unwrap())
    }

    #[test]
    fn accepts_a_substantial_description() {
        assert!(check("This change reworks the retry loop around login.").is_empty());
    }

    #[test]
    fn requires_a_description() {
        let violations = check("   ");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].error, "Description is required");
    }

    #[test]
    fn rejects_short_descriptions() {
        let violations = check("too short");
        assert_eq!(violations.len(), 1);
        assert!(violations[0].error.contains("too short"));
    }
}
