use error_stack::Result;

use super::{CheckContext, ConformityRule, RuleError, RuleOutcome, Severity, Violation};
use crate::codeowners::ApprovalSummary;
use crate::config::ApprovalsConfig;

pub struct ApprovalsRule {
    config: ApprovalsConfig,
}

impl ApprovalsRule {
    pub fn new(config: ApprovalsConfig) -> Self {
        Self { config }
    }
}

impl ConformityRule for ApprovalsRule {
    fn name(&self) -> &'static str {
        "Approvals Required"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<RuleOutcome, RuleError> {
        // With no CODEOWNERS data the codeowners mode degrades to the
        // plain counter.
        if self.config.use_codeowners && !ctx.codeowners_groups.is_empty() {
            let summary = ApprovalSummary::build(ctx.codeowners_groups, ctx.approvals, ctx.members);
            if summary.all_approved {
                return Ok(RuleOutcome::Passed);
            }
            let (table, suggestion) = summary.render();
            return Ok(RuleOutcome::Failed(vec![Violation {
                error: table,
                suggestion: (!suggestion.is_empty()).then_some(suggestion),
            }]));
        }

        if ctx.approvals.count < self.config.min_count {
            return Ok(RuleOutcome::Failed(vec![Violation::new(
                format!(
                    "Insufficient approvals (need {}, have {})",
                    self.config.min_count, ctx.approvals.count
                ),
                "Wait for required approvals before merging",
            )]));
        }

        Ok(RuleOutcome::Passed)
    }
}
