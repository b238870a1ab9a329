use itertools::Itertools;

use super::RuleFailure;
use super::rules::Severity;
use crate::gitlab::DISCUSSION_MARKER;

/// The markdown compliance report posted to the MR. The heading carries
/// the marker string that makes later updates find the note again.
pub fn generate(failures: &[RuleFailure]) -> String {
    if failures.is_empty() {
        return format!("## 🧾 **{DISCUSSION_MARKER}**\n\n✅ **All conformity checks passed!**");
    }

    let mut report = format!(
        "## 🧾 **{DISCUSSION_MARKER}**\n\n### ❌ {} conformity check(s) failed:\n\n---\n\n",
        failures.len()
    );

    // Errors first, then warnings; stable within a severity.
    let sorted = failures
        .iter()
        .sorted_by(|a, b| b.severity.cmp(&a.severity));

    for failure in sorted {
        report.push_str(&format_failure(failure));
    }

    report
}

/// The one-line result used as the commit status description.
pub fn status_line(failures: &[RuleFailure]) -> String {
    if failures.is_empty() {
        "All conformity checks passed".to_string()
    } else {
        format!("{} conformity check(s) failed", failures.len())
    }
}

fn format_failure(failure: &RuleFailure) -> String {
    let emoji = severity_emoji(failure.severity);
    let mut section = format!("#### {emoji} **{}**\n\n", failure.rule_name);

    for (index, violation) in failure.violations.iter().enumerate() {
        section.push_str(&format!("📄 **Issue {}**: {}\n", index + 1, violation.error));
        if let Some(suggestion) = &violation.suggestion {
            section.push_str(&format!(">💡 **Tip**: {suggestion}"));
        }
        section.push_str("\n---\n\n");
    }

    section.push_str("\n---\n\n");
    section
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "❌",
        Severity::Warning => "⚠️",
    }
}
