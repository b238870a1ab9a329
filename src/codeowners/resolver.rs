use std::fmt::{self, Display};

use super::matcher::MatchKind;
use super::owner::Owner;
use super::parser::{CodeownersFile, OwnershipRule, Section};

/// Name of the synthetic section wrapping rules that appear before any
/// section header.
pub const DEFAULT_SECTION: &str = "Default";

/// One pattern that matched a file within a section. `overridden_by`
/// indexes into the owning section's `matching_patterns` vector, so the
/// override chain is arena-encoded rather than a web of references.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingPattern {
    pub pattern: String,
    pub is_exclusion: bool,
    pub line_number: usize,
    pub rule_index: usize,
    pub match_kind: MatchKind,
    pub is_active: bool,
    pub overridden_by: Option<usize>,
}

impl Display for MatchingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exclusion {
            write!(f, "!")?;
        }
        write!(
            f,
            "{} [line {}, {} match]",
            self.pattern, self.line_number, self.match_kind
        )?;
        if self.is_active {
            write!(f, " (active)")?;
        }
        Ok(())
    }
}

/// What one section contributes for one file: the active owner set, the
/// approval requirement, and every pattern that matched along the way.
#[derive(Debug, Clone)]
pub struct SectionOwnership {
    pub name: String,
    pub owners: Vec<Owner>,
    pub required_approvals: u32,
    pub is_optional: bool,
    pub is_auto_approved: bool,
    pub used_default_owners: bool,
    pub validation_errors: Vec<String>,
    pub matching_patterns: Vec<MatchingPattern>,
}

impl SectionOwnership {
    pub fn active_pattern(&self) -> Option<&MatchingPattern> {
        self.matching_patterns.iter().find(|pattern| pattern.is_active)
    }
}

impl CodeownersFile {
    /// Resolve the per-section ownership of one file. Sections that no
    /// rule matched contribute nothing; the synthetic Default section
    /// comes first, then declared sections in source order.
    pub fn owners_for_file(&self, file_path: &str) -> Vec<SectionOwnership> {
        let mut result = Vec::new();
        if let Some(ownership) = self.resolve(&self.default_rules, None, DEFAULT_SECTION, file_path)
        {
            result.push(ownership);
        }
        for section in &self.sections {
            if let Some(ownership) = self.resolve(&section.rules, Some(section), &section.name, file_path) {
                result.push(ownership);
            }
        }
        result
    }

    fn resolve(
        &self,
        rules: &[OwnershipRule],
        section: Option<&Section>,
        section_name: &str,
        file_path: &str,
    ) -> Option<SectionOwnership> {
        let mut matched: Vec<MatchingPattern> = Vec::new();
        let mut owners: Vec<Owner> = Vec::new();
        let mut validation_errors: Vec<String> = Vec::new();
        let mut excluded = false;
        let mut is_auto_approved = false;
        let mut used_default_owners = false;
        let mut active: Option<usize> = None;

        for (rule_index, rule) in rules.iter().enumerate() {
            if !self.patterns.matches(&rule.pattern, file_path) {
                continue;
            }

            // Later rules take precedence: demote the previous active
            // pattern and record what superseded it.
            let next = matched.len();
            if let Some(previous) = active {
                matched[previous].is_active = false;
                matched[previous].overridden_by = Some(next);
            }
            matched.push(MatchingPattern {
                pattern: rule.pattern.clone(),
                is_exclusion: rule.is_exclusion,
                line_number: rule.line_number,
                rule_index,
                match_kind: MatchKind::of(&rule.pattern),
                is_active: true,
                overridden_by: None,
            });
            active = Some(next);

            if rule.is_exclusion {
                excluded = true;
                owners.clear();
                is_auto_approved = false;
                used_default_owners = false;
            } else if !excluded {
                if rule.has_parse_error() && !rule.is_valid {
                    // A broken rule cannot name approvers; the pattern is
                    // satisfied without them.
                    is_auto_approved = true;
                    owners.clear();
                    used_default_owners = false;
                } else if rule.has_zero_owners {
                    match section {
                        Some(section) if !section.default_owners.is_empty() => {
                            owners = split_valid_owners(
                                &section.default_owners,
                                "inaccessible section default owner",
                                &mut validation_errors,
                            );
                            is_auto_approved = owners.is_empty();
                            used_default_owners = true;
                        }
                        _ => {
                            is_auto_approved = true;
                            owners.clear();
                            used_default_owners = false;
                        }
                    }
                } else {
                    owners = split_valid_owners(
                        &rule.owners,
                        "inaccessible owner",
                        &mut validation_errors,
                    );
                    is_auto_approved = owners.is_empty();
                    used_default_owners = false;
                    if let Some(error) = &rule.parse_error {
                        validation_errors.push(error.clone());
                    }
                }
            }
        }

        if matched.is_empty() {
            return None;
        }

        // Explicit rule owners always need exactly one approval; the
        // section's count only applies to its default owners.
        let required_approvals = if used_default_owners {
            section.map(|section| section.required_approvals).unwrap_or(1)
        } else {
            1
        };

        Some(SectionOwnership {
            name: section_name.to_string(),
            owners,
            required_approvals,
            is_optional: section.map(|section| section.is_optional).unwrap_or(false),
            is_auto_approved,
            used_default_owners,
            validation_errors,
            matching_patterns: matched,
        })
    }
}

fn split_valid_owners(
    owners: &[Owner],
    error_prefix: &str,
    validation_errors: &mut Vec<String>,
) -> Vec<Owner> {
    let mut valid = Vec::new();
    for owner in owners {
        if owner.is_valid {
            valid.push(owner.clone());
        } else {
            validation_errors.push(format!("{error_prefix}: {}", owner.original));
        }
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codeowners::owner::AccessibleOwners;
    use crate::codeowners::parser::Parser;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> CodeownersFile {
        let mut accessible = AccessibleOwners::default();
        for user in ["a", "b1", "b2", "w", "alice", "bob"] {
            accessible.add_user(user);
        }
        Parser::new().with_accessible_owners(accessible).parse(text)
    }

    fn owner_names(ownership: &SectionOwnership) -> Vec<&str> {
        ownership.owners.iter().map(|owner| owner.name.as_str()).collect()
    }

    #[test]
    fn exclusion_removes_ownership() {
        let file = parse("*.go @a\n!vendor/*.go\n");

        let excluded = file.owners_for_file("vendor/x.go");
        assert_eq!(excluded.len(), 1);
        assert!(excluded[0].owners.is_empty());
        assert!(!excluded[0].is_auto_approved);

        let owned = file.owners_for_file("src/x.go");
        assert_eq!(owner_names(&owned[0]), vec!["a"]);
    }

    #[test]
    fn section_default_owners_apply_to_bare_rules() {
        let file = parse("[Backend][2] @b1 @b2\napi/*.go\n");
        let ownership = file.owners_for_file("api/s.go");
        assert_eq!(ownership.len(), 1);
        let backend = &ownership[0];
        assert_eq!(backend.name, "Backend");
        assert_eq!(owner_names(backend), vec!["b1", "b2"]);
        assert_eq!(backend.required_approvals, 2);
        assert!(backend.used_default_owners);
    }

    #[test]
    fn explicit_owners_override_section_approval_count() {
        let file = parse("[Backend][3] @b1\napi/*.go @a\n");
        let ownership = file.owners_for_file("api/s.go");
        assert_eq!(ownership[0].required_approvals, 1);
        assert!(!ownership[0].used_default_owners);
    }

    #[test]
    fn parse_error_rule_is_auto_approved() {
        let file = parse("src/** @@nosuchrole\n");
        let ownership = file.owners_for_file("src/a.go");
        assert_eq!(ownership.len(), 1);
        assert!(ownership[0].is_auto_approved);
        assert!(ownership[0].owners.is_empty());
    }

    #[test]
    fn zero_owner_rule_without_defaults_is_auto_approved() {
        let file = parse("docs/**\n");
        let ownership = file.owners_for_file("docs/guide.md");
        assert!(ownership[0].is_auto_approved);
        assert_eq!(ownership[0].required_approvals, 1);
    }

    #[test]
    fn optional_section_is_flagged() {
        let file = parse("^[Docs]\ndocs/** @w\n");
        let ownership = file.owners_for_file("docs/guide.md");
        assert!(ownership[0].is_optional);
        assert_eq!(owner_names(&ownership[0]), vec!["w"]);
    }

    #[test]
    fn last_match_wins_and_override_chain_is_recorded() {
        let file = parse("src/* @a\nsrc/main.go @b1\n");
        let ownership = file.owners_for_file("src/main.go");
        let patterns = &ownership[0].matching_patterns;
        assert_eq!(patterns.len(), 2);
        assert!(!patterns[0].is_active);
        assert_eq!(patterns[0].overridden_by, Some(1));
        assert!(patterns[1].is_active);
        assert_eq!(patterns[1].overridden_by, None);
        assert_eq!(owner_names(&ownership[0]), vec!["b1"]);
    }

    #[test]
    fn at_most_one_active_pattern_per_section() {
        let file = parse(indoc! {"
            *.go @a
            src/*.go @b1
            src/main.go @b2
            [Extra]
            *.go @w
        "});
        for path in ["src/main.go", "src/other.go", "lib/x.go"] {
            for ownership in file.owners_for_file(path) {
                let active = ownership
                    .matching_patterns
                    .iter()
                    .filter(|pattern| pattern.is_active)
                    .count();
                assert_eq!(active, 1, "path {path} section {}", ownership.name);
                for pattern in &ownership.matching_patterns {
                    assert!(pattern.is_active || pattern.overridden_by.is_some());
                }
            }
        }
    }

    #[test]
    fn exclusion_is_sticky_for_later_owner_rules() {
        let file = parse("!secret/*\nsecret/* @a\n");
        let ownership = file.owners_for_file("secret/key.pem");
        assert!(ownership[0].owners.is_empty());
        assert!(!ownership[0].is_auto_approved);
    }

    #[test]
    fn unmatched_sections_contribute_nothing() {
        let file = parse("[Backend]\napi/* @a\n");
        assert!(file.owners_for_file("docs/readme.md").is_empty());
    }

    #[test]
    fn inaccessible_owners_are_reported_not_used() {
        let file = parse("*.rs @alice @mallory\n");
        let ownership = file.owners_for_file("lib.rs");
        assert_eq!(owner_names(&ownership[0]), vec!["alice"]);
        assert_eq!(
            ownership[0].validation_errors,
            vec!["inaccessible owner: @mallory".to_string()]
        );
    }

    #[test]
    fn splitting_a_section_across_headers_changes_nothing() {
        let combined = parse(indoc! {"
            [Backend][2] @b1
            api/*.go
            db/*.go @a
        "});
        let split = parse(indoc! {"
            [Backend][2] @b1
            api/*.go
            [backend]
            db/*.go @a
        "});
        for path in ["api/s.go", "db/m.go"] {
            let a = combined.owners_for_file(path);
            let b = split.owners_for_file(path);
            assert_eq!(a.len(), b.len(), "path {path}");
            assert_eq!(owner_names(&a[0]), owner_names(&b[0]));
            assert_eq!(a[0].required_approvals, b[0].required_approvals);
            let shape = |ownership: &SectionOwnership| {
                ownership
                    .matching_patterns
                    .iter()
                    .map(|p| (p.pattern.clone(), p.is_exclusion, p.is_active, p.overridden_by))
                    .collect::<Vec<_>>()
            };
            assert_eq!(shape(&a[0]), shape(&b[0]));
        }
    }
}
