use itertools::Itertools;
use std::collections::HashMap;

use super::aggregator::PatternGroup;
use super::owner::{Owner, role_access_level};
use crate::gitlab::{Approvals, Member};

/// Approval coverage of one active pattern group.
#[derive(Debug, Clone)]
pub struct PatternApproval {
    pub section_name: String,
    pub pattern: String,
    pub line_number: usize,
    pub required_count: u32,
    pub approved_count: u32,
    pub is_fully_approved: bool,
    pub is_auto_approved: bool,
    pub is_optional: bool,
    pub allowed_approvers: Vec<String>,
    pub validation_errors: Vec<String>,
}

/// One rendered table row: pattern groups merged by section name and
/// allowed-approver set.
#[derive(Debug, Clone)]
struct MergedRow {
    section_name: String,
    patterns: Vec<String>,
    required_count: u32,
    approved_count: u32,
    is_fully_approved: bool,
    is_auto_approved: bool,
    is_optional: bool,
    allowed_approvers: Vec<String>,
}

/// Cross-reference of the active pattern groups with the current approval
/// set and the project membership.
#[derive(Debug)]
pub struct ApprovalSummary {
    pub patterns: Vec<PatternApproval>,
    pub total_approved: usize,
    pub total_required: usize,
    pub all_approved: bool,
    rows: Vec<MergedRow>,
}

impl ApprovalSummary {
    pub fn build(groups: &[PatternGroup], approvals: &Approvals, members: &[Member]) -> Self {
        let mut patterns = Vec::new();
        let mut rows: Vec<MergedRow> = Vec::new();
        let mut row_index: HashMap<(String, String), usize> = HashMap::new();

        for group in groups {
            // Exclusions remove ownership; they never need approvals.
            if group.is_exclusion {
                continue;
            }

            let allowed_approvers = expand_allowed_approvers(&group.owners, members);
            let satisfied_without_approvals =
                group.is_auto_approved || group.is_optional || group.owners.is_empty();

            let approved_count = if satisfied_without_approvals {
                group.required_approvals
            } else {
                count_owner_approvals(&group.owners, approvals, members)
            };

            let pattern = PatternApproval {
                section_name: group.section_name.clone(),
                pattern: group.pattern.clone(),
                line_number: group.line_number,
                required_count: group.required_approvals,
                approved_count,
                is_fully_approved: satisfied_without_approvals
                    || approved_count >= group.required_approvals,
                is_auto_approved: group.is_auto_approved,
                is_optional: group.is_optional,
                allowed_approvers: allowed_approvers.clone(),
                validation_errors: group.validation_errors.clone(),
            };

            let signature = allowed_approvers.iter().sorted().join("|");
            let key = (group.section_name.clone(), signature);
            match row_index.get(&key) {
                Some(&index) => {
                    let row = &mut rows[index];
                    row.patterns.push(group.pattern.clone());
                    row.is_auto_approved |= group.is_auto_approved;
                }
                None => {
                    row_index.insert(key, rows.len());
                    rows.push(MergedRow {
                        section_name: group.section_name.clone(),
                        patterns: vec![group.pattern.clone()],
                        required_count: group.required_approvals,
                        approved_count: 0,
                        is_fully_approved: false,
                        is_auto_approved: group.is_auto_approved,
                        is_optional: group.is_optional,
                        allowed_approvers,
                    });
                }
            }

            patterns.push(pattern);
        }

        for row in &mut rows {
            row.approved_count = count_allowed_approvals(&row.allowed_approvers, approvals);
            row.is_auto_approved =
                row.is_auto_approved || row.is_optional || row.allowed_approvers.is_empty();
            row.is_fully_approved =
                row.approved_count >= row.required_count || row.is_auto_approved;
        }

        let total_approved = patterns.iter().filter(|p| p.is_fully_approved).count();
        let total_required = patterns
            .iter()
            .filter(|p| !p.is_optional && !p.is_auto_approved)
            .count();
        let all_approved = patterns.iter().all(|p| p.is_fully_approved);

        Self {
            patterns,
            total_approved,
            total_required,
            all_approved,
            rows,
        }
    }

    /// The aggregated markdown table and the trailing suggestion block
    /// (approval reminder plus any syntax errors).
    pub fn render(&self) -> (String, String) {
        let mut table =
            String::from("\n\n| | Code owners | Approvals | Allowed approvers |\n| --- | --- | --- | --- |\n");
        let mut needs_approvals = false;

        for row in &self.rows {
            let checkbox = if row.is_fully_approved { "[x]" } else { "[ ]" };
            let patterns = row.patterns.iter().map(|pattern| format!("``{pattern}``")).join("<br>");
            let approvals_cell = if row.is_optional {
                "Optional".to_string()
            } else if row.is_auto_approved {
                "Auto-approved".to_string()
            } else {
                format!("{} of {}", row.approved_count, row.required_count)
            };
            let approvers = row
                .allowed_approvers
                .iter()
                .map(|approver| format!("@{approver}"))
                .join(", ");
            table.push_str(&format!(
                "|<ul><li>{checkbox} </li></ul>| <sub>{}</sub><br>{} | {} | {} |\n",
                row.section_name, patterns, approvals_cell, approvers,
            ));
            if !row.is_fully_approved {
                needs_approvals = true;
            }
        }

        let mut suggestion = String::new();
        if needs_approvals {
            suggestion.push_str("Wait for required approvals before merging\n");
        }

        let syntax_errors: Vec<(usize, &str)> = self
            .patterns
            .iter()
            .flat_map(|pattern| {
                pattern
                    .validation_errors
                    .iter()
                    .map(|error| (pattern.line_number, error.trim()))
            })
            .filter(|(_, error)| !error.is_empty())
            .collect();
        if !syntax_errors.is_empty() {
            suggestion.push_str("\n> **🚨 Syntax errors:**\n");
            for (line_number, error) in syntax_errors {
                suggestion.push_str(&format!("> - Line {line_number}: {error}\n"));
            }
        }

        (table, suggestion)
    }
}

/// Usernames allowed to approve for `owners`: roles expand to the members
/// holding exactly the required access level, everything else contributes
/// its normalised name.
fn expand_allowed_approvers(owners: &[Owner], members: &[Member]) -> Vec<String> {
    let mut allowed = Vec::new();
    for owner in owners {
        if owner.is_role() {
            allowed.extend(role_members(&owner.name, members));
        } else {
            allowed.push(owner.name.clone());
        }
    }
    allowed
}

fn role_members(role: &str, members: &[Member]) -> Vec<String> {
    let Some(required_level) = role_access_level(role) else {
        return Vec::new();
    };
    members
        .iter()
        .filter(|member| member.access_level == required_level)
        .map(|member| member.username.clone())
        .collect()
}

/// Distinct users whose latest state is approved and who match one of the
/// pattern's owners.
fn count_owner_approvals(owners: &[Owner], approvals: &Approvals, members: &[Member]) -> u32 {
    approvals
        .per_user
        .values()
        .filter(|approval| approval.status.is_approved())
        .filter(|approval| {
            owners
                .iter()
                .any(|owner| owner_matches_username(owner, &approval.username, members))
        })
        .count() as u32
}

fn count_allowed_approvals(allowed: &[String], approvals: &Approvals) -> u32 {
    approvals
        .per_user
        .values()
        .filter(|approval| approval.status.is_approved())
        .filter(|approval| {
            allowed
                .iter()
                .any(|approver| approver.eq_ignore_ascii_case(&approval.username))
        })
        .count() as u32
}

fn owner_matches_username(owner: &Owner, username: &str, members: &[Member]) -> bool {
    if owner.is_email {
        return owner.name.eq_ignore_ascii_case(username)
            || username.to_lowercase().contains(&owner.name.to_lowercase());
    }
    if owner.is_role() {
        return role_members(&owner.name, members)
            .iter()
            .any(|member| member.eq_ignore_ascii_case(username));
    }
    owner.name.eq_ignore_ascii_case(username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codeowners::Codeowners;
    use crate::gitlab::{ApprovalInfo, ApprovalStatus};
    use chrono::Utc;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn member(username: &str, access_level: u32) -> Member {
        Member {
            username: username.to_string(),
            email: Some(format!("{username}@example.com")),
            access_level,
        }
    }

    fn approvals_from(usernames: &[(&str, ApprovalStatus)]) -> Approvals {
        let mut per_user = HashMap::new();
        for (index, (username, status)) in usernames.iter().enumerate() {
            let user_id = index as u64 + 1;
            per_user.insert(
                user_id,
                ApprovalInfo {
                    user_id,
                    username: username.to_string(),
                    status: *status,
                    updated_at: Utc::now(),
                },
            );
        }
        let count = per_user
            .values()
            .filter(|approval| approval.status.is_approved())
            .count() as u32;
        Approvals { count, per_user }
    }

    fn summary_for(
        codeowners: &str,
        paths: &[&str],
        members: &[Member],
        approvals: &Approvals,
    ) -> ApprovalSummary {
        let parsed = Codeowners::parse(codeowners, members);
        let paths: Vec<String> = paths.iter().map(|path| path.to_string()).collect();
        let groups = parsed.pattern_groups(&paths);
        ApprovalSummary::build(&groups, approvals, members)
    }

    #[test]
    fn section_defaults_require_two_distinct_approvals() {
        let members = vec![member("b1", 40), member("b2", 30)];
        let one = summary_for(
            "[Backend][2] @b1 @b2\napi/*.go\n",
            &["api/s.go"],
            &members,
            &approvals_from(&[("b1", ApprovalStatus::Approved)]),
        );
        assert_eq!(one.patterns[0].required_count, 2);
        assert_eq!(one.patterns[0].approved_count, 1);
        assert!(!one.all_approved);

        let both = summary_for(
            "[Backend][2] @b1 @b2\napi/*.go\n",
            &["api/s.go"],
            &members,
            &approvals_from(&[
                ("b1", ApprovalStatus::Approved),
                ("b2", ApprovalStatus::Approved),
            ]),
        );
        assert!(both.all_approved);
        assert_eq!(both.patterns[0].approved_count, 2);
    }

    #[test]
    fn optional_sections_are_satisfied_without_approvals() {
        let members = vec![member("w", 30)];
        let summary = summary_for(
            "^[Docs]\ndocs/** @w\n",
            &["docs/guide.md"],
            &members,
            &approvals_from(&[]),
        );
        assert!(summary.patterns[0].is_optional);
        assert!(summary.patterns[0].is_fully_approved);
        assert!(summary.all_approved);
        assert_eq!(summary.total_required, 0);
    }

    #[test]
    fn auto_approved_groups_count_as_satisfied() {
        let members = vec![member("a", 30)];
        let summary = summary_for(
            "src/** @@nosuchrole\n",
            &["src/a.go"],
            &members,
            &approvals_from(&[]),
        );
        assert!(summary.patterns[0].is_auto_approved);
        assert!(summary.patterns[0].is_fully_approved);
        assert_eq!(
            summary.patterns[0].approved_count,
            summary.patterns[0].required_count
        );
    }

    #[test]
    fn exclusion_groups_are_skipped() {
        let members = vec![member("a", 30)];
        let summary = summary_for(
            "*.go @a\n!vendor/*.go\n",
            &["vendor/x.go", "src/y.go"],
            &members,
            &approvals_from(&[("a", ApprovalStatus::Approved)]),
        );
        assert_eq!(summary.patterns.len(), 1);
        assert_eq!(summary.patterns[0].pattern, "*.go");
        assert!(summary.all_approved);
    }

    #[test]
    fn roles_expand_to_members_at_exactly_that_level() {
        let members = vec![member("dev", 30), member("maint", 40), member("own", 50)];
        let summary = summary_for(
            "*.rs @@maintainers\n",
            &["lib.rs"],
            &members,
            &approvals_from(&[("own", ApprovalStatus::Approved)]),
        );
        assert_eq!(summary.patterns[0].allowed_approvers, vec!["maint"]);
        assert!(!summary.all_approved);

        let approved = summary_for(
            "*.rs @@maintainers\n",
            &["lib.rs"],
            &members,
            &approvals_from(&[("MAINT", ApprovalStatus::Approved)]),
        );
        assert!(approved.all_approved);
    }

    #[test]
    fn unapproval_does_not_count() {
        let members = vec![member("a", 30)];
        let summary = summary_for(
            "*.go @a\n",
            &["src/x.go"],
            &members,
            &approvals_from(&[("a", ApprovalStatus::Unapproved)]),
        );
        assert_eq!(summary.patterns[0].approved_count, 0);
        assert!(!summary.all_approved);
    }

    #[test]
    fn email_owners_match_by_substring() {
        let members = vec![member("alice.smith", 30)];
        let mut accessible_members = members.clone();
        accessible_members[0].email = Some("alice@corp.io".to_string());
        let summary = summary_for(
            "*.rs alice@corp.io\n",
            &["lib.rs"],
            &accessible_members,
            &approvals_from(&[("alice@corp.io.smith", ApprovalStatus::Approved)]),
        );
        assert_eq!(summary.patterns[0].approved_count, 1);
    }

    #[test]
    fn rendered_table_lists_merged_patterns_and_counter() {
        let members = vec![member("b1", 40)];
        let summary = summary_for(
            indoc! {"
                [Backend] @b1
                api/*.go
                db/*.go
            "},
            &["api/s.go", "db/m.go"],
            &members,
            &approvals_from(&[]),
        );
        let (table, suggestion) = summary.render();
        assert!(table.contains("| | Code owners | Approvals | Allowed approvers |"));
        assert!(table.contains("``api/*.go``<br>``db/*.go``"));
        assert!(table.contains("<sub>Backend</sub>"));
        assert!(table.contains("0 of 1"));
        assert!(table.contains("@b1"));
        assert!(table.contains("[ ]"));
        assert!(suggestion.contains("Wait for required approvals before merging"));
    }

    #[test]
    fn syntax_errors_are_rendered_by_line() {
        let members = vec![member("a", 30)];
        let summary = summary_for(
            "*.go @a @mallory\n",
            &["src/x.go"],
            &members,
            &approvals_from(&[("a", ApprovalStatus::Approved)]),
        );
        let (_, suggestion) = summary.render();
        assert!(suggestion.contains("🚨 Syntax errors:"));
        assert!(suggestion.contains("Line 1: inaccessible owner: @mallory"));
    }

    #[test]
    fn satisfied_summary_renders_checked_rows_without_suggestion() {
        let members = vec![member("a", 30)];
        let summary = summary_for(
            "*.go @a\n",
            &["src/x.go"],
            &members,
            &approvals_from(&[("a", ApprovalStatus::Approved)]),
        );
        let (table, suggestion) = summary.render();
        assert!(table.contains("[x]"));
        assert!(suggestion.is_empty());
    }
}
