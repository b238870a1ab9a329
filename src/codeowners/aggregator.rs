use std::collections::HashMap;

use super::matcher::MatchKind;
use super::owner::Owner;
use super::parser::CodeownersFile;

/// Changed files grouped under the active pattern that claimed them,
/// carrying everything the approval summary needs.
#[derive(Debug, Clone)]
pub struct PatternGroup {
    pub pattern: String,
    pub section_name: String,
    pub is_exclusion: bool,
    pub line_number: usize,
    pub match_kind: MatchKind,
    pub files: Vec<String>,
    pub owners: Vec<Owner>,
    pub required_approvals: u32,
    pub is_optional: bool,
    pub is_auto_approved: bool,
    pub used_default_owners: bool,
    pub validation_errors: Vec<String>,
}

/// Group `paths` by their active matching pattern, one group per
/// `(section, exclusion, pattern, line)`. Exclusion groups are kept for
/// introspection; approval computation filters them out.
pub fn active_pattern_groups(file: &CodeownersFile, paths: &[String]) -> Vec<PatternGroup> {
    let mut groups: HashMap<(String, bool, String, usize), PatternGroup> = HashMap::new();

    for path in paths {
        for ownership in file.owners_for_file(path) {
            for matching in &ownership.matching_patterns {
                if !matching.is_active {
                    continue;
                }
                let key = (
                    ownership.name.clone(),
                    matching.is_exclusion,
                    matching.pattern.clone(),
                    matching.line_number,
                );
                groups
                    .entry(key)
                    .and_modify(|group| group.files.push(path.clone()))
                    .or_insert_with(|| PatternGroup {
                        pattern: matching.pattern.clone(),
                        section_name: ownership.name.clone(),
                        is_exclusion: matching.is_exclusion,
                        line_number: matching.line_number,
                        match_kind: matching.match_kind,
                        files: vec![path.clone()],
                        owners: ownership.owners.clone(),
                        required_approvals: ownership.required_approvals,
                        is_optional: ownership.is_optional,
                        is_auto_approved: ownership.is_auto_approved,
                        used_default_owners: ownership.used_default_owners,
                        validation_errors: ownership.validation_errors.clone(),
                    });
            }
        }
    }

    let mut groups: Vec<PatternGroup> = groups.into_values().collect();
    for group in &mut groups {
        group.files.sort();
        group.files.dedup();
    }
    groups.sort_by(|a, b| {
        (a.line_number, &a.section_name, &a.pattern).cmp(&(b.line_number, &b.section_name, &b.pattern))
    });
    groups
}
