use error_stack::{Report, Result};
use glob::{MatchOptions, Pattern};

use super::{CheckContext, ConformityRule, RuleError, RuleOutcome, Severity, Violation};
use crate::config::SquashConfig;

/// Branch patterns are path-style globs: `*` stays within one segment,
/// `**` crosses slashes.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub struct SquashRule {
    config: SquashConfig,
}

impl SquashRule {
    pub fn new(config: SquashConfig) -> Self {
        Self { config }
    }
}

impl ConformityRule for SquashRule {
    fn name(&self) -> &'static str {
        "Squash enforce"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<RuleOutcome, RuleError> {
        let branch_name = &ctx.mr.source_branch;
        let squash = ctx.mr.squash_on_merge;
        let mut matched = false;
        let mut violations = Vec::new();

        for pattern in &self.config.enforce_branches {
            if branch_matches(pattern, branch_name)? {
                matched = true;
                if squash {
                    return Ok(RuleOutcome::Passed);
                }
                violations.push(Violation::new(
                    format!(
                        "Branch '{branch_name}' must use squash on merge (matched enforce pattern: {pattern})"
                    ),
                    "Enable squash on merge",
                ));
                break;
            }
        }

        for pattern in &self.config.disallow_branches {
            if branch_matches(pattern, branch_name)? {
                matched = true;
                if !squash {
                    return Ok(RuleOutcome::Passed);
                }
                violations.push(Violation::new(
                    format!(
                        "Branch '{branch_name}' must not use squash on merge (matched disallow pattern: {pattern})"
                    ),
                    "Disable squash on merge",
                ));
                break;
            }
        }

        // Unmatched branches require squash by default.
        if !matched {
            if squash {
                return Ok(RuleOutcome::Passed);
            }
            violations.push(Violation::new(
                format!(
                    "Branch '{branch_name}' is not matched by any rule and must squash on merge by default"
                ),
                "Enable squash on merge",
            ));
        }

        Ok(RuleOutcome::from_violations(violations))
    }
}

fn branch_matches(pattern: &str, branch_name: &str) -> Result<bool, RuleError> {
    let compiled = Pattern::new(pattern)
        .map_err(|_| Report::new(RuleError::InvalidPattern(pattern.to_string())))?;
    Ok(compiled.matches_with(branch_name, MATCH_OPTIONS))
}
