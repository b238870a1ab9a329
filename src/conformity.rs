use core::fmt;
use std::sync::Arc;

use error_stack::{Context, Result, ResultExt};
use serde::Serialize;
use tracing::{debug, error, instrument, warn};

mod config_loader;
mod conventional;
pub mod report;
mod rules;

pub use config_loader::{ConfigLoader, RULES_FILE_PATH, decode_file_content};
pub use rules::{
    ApprovalsRule, BranchRule, CheckContext, CommitsRule, ConformityRule, DescriptionRule, Rule,
    RuleError, RuleOutcome, Severity, SquashRule, TitleRule, Violation, build_rules,
};

use crate::codeowners::Codeowners;
use crate::config::RulesConfig;
use crate::gitlab::Client;

/// Standard CODEOWNERS locations, tried in order.
const CODEOWNERS_PATHS: [&str; 3] = ["CODEOWNERS", ".gitlab/CODEOWNERS", "docs/CODEOWNERS"];

#[derive(Debug)]
pub enum Error {
    Platform,
}

impl Context for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Platform => f.write_str("platform data unavailable for check"),
        }
    }
}

/// One rule that did not pass, with everything it found.
#[derive(Debug, Serialize)]
pub struct RuleFailure {
    pub rule_name: String,
    pub severity: Severity,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub failures: Vec<RuleFailure>,
    pub summary: String,
    pub status_line: String,
}

/// Orchestrates one conformity check: resolve config, fetch the MR data,
/// run the enabled rules, produce the report.
pub struct Checker {
    config_loader: ConfigLoader,
    client: Arc<Client>,
}

impl Checker {
    pub fn new(defaults: RulesConfig, client: Arc<Client>) -> Self {
        Self {
            config_loader: ConfigLoader::new(defaults),
            client,
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn check_merge_request(&self, project: &str, mr_iid: u64) -> Result<CheckResult, Error> {
        let rules_config = self.config_loader.load(&self.client, project).await;
        let rule_set = build_rules(&rules_config);

        let mr = self
            .client
            .get_merge_request(project, mr_iid)
            .await
            .change_context(Error::Platform)?;
        let commits = self
            .client
            .list_merge_request_commits(project, mr_iid)
            .await
            .change_context(Error::Platform)?;
        let approvals = self
            .client
            .list_merge_request_approvals(project, mr_iid)
            .await
            .change_context(Error::Platform)?;

        // CODEOWNERS data is only assembled when a rule will look at it.
        let needs_codeowners = rules_config.approvals.enabled && rules_config.approvals.use_codeowners;
        let (members, codeowners_groups) = if needs_codeowners {
            let members = self
                .client
                .list_project_members(project)
                .await
                .change_context(Error::Platform)?;
            let groups = match self.fetch_codeowners(project).await {
                Some(text) => {
                    let paths = self
                        .client
                        .get_all_diffs_paths(project, mr_iid)
                        .await
                        .change_context(Error::Platform)?;
                    Codeowners::parse(&text, &members).pattern_groups(&paths)
                }
                None => {
                    debug!(project, "no CODEOWNERS file; ownership enforcement disabled");
                    Vec::new()
                }
            };
            (members, groups)
        } else {
            (Vec::new(), Vec::new())
        };

        let ctx = CheckContext {
            mr: &mr,
            commits: &commits,
            approvals: &approvals,
            codeowners_groups: &codeowners_groups,
            members: &members,
        };
        let failures = run_rules(&rule_set, &ctx);

        let summary = report::generate(&failures);
        let status_line = report::status_line(&failures);
        Ok(CheckResult {
            passed: failures.is_empty(),
            failures,
            summary,
            status_line,
        })
    }

    async fn fetch_codeowners(&self, project: &str) -> Option<String> {
        for path in CODEOWNERS_PATHS {
            let Ok(content) = self.client.get_file(project, path, "HEAD").await else {
                continue;
            };
            match decode_file_content(&content) {
                Ok(text) => return Some(text),
                Err(reason) => {
                    warn!(project, path, ?reason, "unreadable CODEOWNERS file; skipping");
                    return None;
                }
            }
        }
        None
    }
}

/// Run every rule; a rule that errors is logged and skipped, never
/// escalated.
fn run_rules(rule_set: &[Rule], ctx: &CheckContext<'_>) -> Vec<RuleFailure> {
    let mut failures = Vec::new();

    for rule in rule_set {
        debug!(rule = rule.name(), "checking rule");
        match rule.check(ctx) {
            Ok(RuleOutcome::Passed) => {}
            Ok(RuleOutcome::Failed(violations)) => failures.push(RuleFailure {
                rule_name: rule.name().to_string(),
                severity: rule.severity(),
                violations,
            }),
            Err(reason) => {
                error!(rule = rule.name(), ?reason, "rule check failed; skipping");
            }
        }
    }

    failures
}
