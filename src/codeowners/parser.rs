use std::collections::HashMap;
use std::fmt::{self, Display};

use itertools::Itertools;
use tracing::debug;

use super::matcher::PatternSet;
use super::owner::{AccessibleOwners, Owner};

const ESCAPED_SPACE: &str = "\\ ";
const ESCAPED_SPACE_PLACEHOLDER: &str = "\u{1}";

/// A single CODEOWNERS rule: a path pattern with its owner tokens.
#[derive(Debug, Clone, Default)]
pub struct OwnershipRule {
    pub pattern: String,
    pub is_exclusion: bool,
    pub owners: Vec<Owner>,
    pub line_number: usize,
    pub is_valid: bool,
    pub has_zero_owners: bool,
    pub parse_error: Option<String>,
}

impl OwnershipRule {
    pub fn has_parse_error(&self) -> bool {
        self.parse_error.is_some()
    }
}

impl Display for OwnershipRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exclusion {
            write!(f, "!")?;
        }
        write!(f, "{}", self.pattern.replace(' ', ESCAPED_SPACE))?;
        for owner in &self.owners {
            write!(f, " {owner}")?;
        }
        Ok(())
    }
}

/// A named section with its own approval count and default owners.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub is_optional: bool,
    pub required_approvals: u32,
    pub default_owners: Vec<Owner>,
    pub rules: Vec<OwnershipRule>,
    pub line_number: usize,
    pub is_combined: bool,
    pub parse_error: Option<String>,
}

impl Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_optional {
            write!(f, "^")?;
        }
        write!(f, "[{}]", self.name)?;
        if self.required_approvals > 1 {
            write!(f, "[{}]", self.required_approvals)?;
        }
        for owner in &self.default_owners {
            write!(f, " {owner}")?;
        }
        Ok(())
    }
}

/// A parsed CODEOWNERS document. Rules before any section header live in
/// `default_rules` and behave as a synthetic single-approval section.
#[derive(Debug, Default)]
pub struct CodeownersFile {
    pub default_rules: Vec<OwnershipRule>,
    pub sections: Vec<Section>,
    pub parse_errors: Vec<String>,
    pub(crate) patterns: PatternSet,
}

impl CodeownersFile {
    fn compile_patterns(&mut self) {
        let patterns: Vec<String> = self
            .default_rules
            .iter()
            .chain(self.sections.iter().flat_map(|section| section.rules.iter()))
            .map(|rule| rule.pattern.clone())
            .collect();
        for pattern in patterns {
            self.patterns.compile(&pattern);
        }
    }
}

/// Line-oriented CODEOWNERS parser bound to one project's accessibility
/// set. Parsing never fails as a whole; malformed input degrades into
/// per-rule and per-section errors.
pub struct Parser {
    accessible: AccessibleOwners,
    strict_validation: bool,
    case_sensitive_sections: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            accessible: AccessibleOwners::default(),
            strict_validation: true,
            case_sensitive_sections: false,
        }
    }

    pub fn with_accessible_owners(mut self, accessible: AccessibleOwners) -> Self {
        self.accessible = accessible;
        self
    }

    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    pub fn with_case_sensitive_sections(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive_sections = case_sensitive;
        self
    }

    pub fn parse(&self, text: &str) -> CodeownersFile {
        let mut file = CodeownersFile::default();
        let mut current: Option<usize> = None;
        let mut sections_by_name: HashMap<String, usize> = HashMap::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if looks_like_section_header(line) {
                match self.parse_section_header(line, line_number) {
                    Ok(section) => {
                        let key = if self.case_sensitive_sections {
                            section.name.clone()
                        } else {
                            section.name.to_lowercase()
                        };
                        if let Some(&existing) = sections_by_name.get(&key) {
                            file.sections[existing].is_combined = true;
                            current = Some(existing);
                        } else {
                            file.sections.push(section);
                            let index = file.sections.len() - 1;
                            sections_by_name.insert(key, index);
                            current = Some(index);
                        }
                        continue;
                    }
                    Err(reason) => {
                        let rule = OwnershipRule {
                            pattern: line.to_string(),
                            line_number,
                            is_valid: false,
                            has_zero_owners: true,
                            parse_error: Some(format!(
                                "unparsable section treated as rule: {reason}"
                            )),
                            ..Default::default()
                        };
                        push_rule(&mut file, current, rule);
                        continue;
                    }
                }
            }

            let rule = self.parse_rule(line, line_number);
            if let Some(error) = &rule.parse_error {
                file.parse_errors.push(format!("line {line_number}: {error}"));
            }
            debug!(
                pattern = %rule.pattern,
                section = current.map(|index| file.sections[index].name.as_str()).unwrap_or("Default"),
                "parsed rule"
            );
            push_rule(&mut file, current, rule);
        }

        self.post_validate(&mut file);
        file.compile_patterns();
        file
    }

    fn parse_rule(&self, line: &str, line_number: usize) -> OwnershipRule {
        let escaped = line.replace(ESCAPED_SPACE, ESCAPED_SPACE_PLACEHOLDER);
        let mut tokens = escaped.split_whitespace();

        let first = tokens.next().unwrap_or_default();
        let (is_exclusion, raw_pattern) = match first.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, first),
        };
        let pattern = unescape(raw_pattern);

        let mut parse_error = None;
        let (owners, invalid) = parse_owner_tokens(tokens.map(unescape));
        if !invalid.is_empty() && self.strict_validation {
            parse_error = Some(format!("invalid owners ignored: [{}]", invalid.iter().join(", ")));
        }

        if parse_error.is_none() {
            if let Some(error) = PatternSet::compile_error(&pattern) {
                parse_error = Some(format!("invalid pattern: {error}"));
            }
        }

        OwnershipRule {
            has_zero_owners: owners.is_empty(),
            is_valid: parse_error.is_none(),
            pattern,
            is_exclusion,
            owners,
            line_number,
            parse_error,
        }
    }

    fn parse_section_header(&self, line: &str, line_number: usize) -> Result<Section, String> {
        let (is_optional, header) = match line.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let close = header
            .find(']')
            .ok_or_else(|| "invalid section header: missing closing bracket".to_string())?;
        let name = header[1..close].trim().to_string();
        if name.is_empty() {
            return Err("section name cannot be empty".to_string());
        }

        let mut required_approvals = 1;
        let mut remaining = header[close + 1..].trim();
        if remaining.starts_with('[') && remaining.contains(']') {
            let end = remaining.find(']').unwrap_or_default();
            if let Ok(count) = remaining[1..end].parse::<i64>() {
                required_approvals = if count < 1 { 1 } else { count as u32 };
                remaining = remaining[end + 1..].trim();
            }
            // A non-integer count is not consumed; it falls through to the
            // default-owners parse and surfaces as an owner error there.
        }

        let mut section = Section {
            name,
            is_optional,
            required_approvals,
            default_owners: Vec::new(),
            rules: Vec::new(),
            line_number,
            is_combined: false,
            parse_error: None,
        };

        if !remaining.is_empty() {
            let (owners, invalid) = parse_owner_tokens(remaining.split_whitespace().map(String::from));
            section.default_owners = owners;
            if !invalid.is_empty() && self.strict_validation {
                section.parse_error = Some(format!(
                    "error parsing section default owners: invalid owners ignored: [{}]",
                    invalid.iter().join(", ")
                ));
            }
        }

        Ok(section)
    }

    fn post_validate(&self, file: &mut CodeownersFile) {
        for rule in &mut file.default_rules {
            self.validate_rule(rule);
        }
        for section in &mut file.sections {
            for owner in &mut section.default_owners {
                owner.is_valid = self.accessible.is_accessible(owner, self.strict_validation);
            }
            for rule in &mut section.rules {
                self.validate_rule(rule);
            }
        }
    }

    fn validate_rule(&self, rule: &mut OwnershipRule) {
        if rule.owners.is_empty() {
            rule.has_zero_owners = true;
            return;
        }

        let mut valid_owners = 0;
        for owner in &mut rule.owners {
            owner.is_valid = self.accessible.is_accessible(owner, self.strict_validation);
            if owner.is_valid {
                valid_owners += 1;
            }
        }

        if valid_owners == 0 {
            rule.has_zero_owners = true;
            rule.is_valid = false;
        } else {
            rule.is_valid = true;
        }
    }
}

fn push_rule(file: &mut CodeownersFile, current: Option<usize>, rule: OwnershipRule) {
    match current {
        Some(index) => file.sections[index].rules.push(rule),
        None => file.default_rules.push(rule),
    }
}

fn looks_like_section_header(line: &str) -> bool {
    line.starts_with('[') || line.starts_with("^[")
}

fn parse_owner_tokens(tokens: impl Iterator<Item = String>) -> (Vec<Owner>, Vec<String>) {
    let mut owners = Vec::new();
    let mut invalid = Vec::new();
    for token in tokens {
        match Owner::parse(&token) {
            Ok(owner) => owners.push(owner),
            Err(_) => invalid.push(token),
        }
    }
    (owners, invalid)
}

fn unescape(token: &str) -> String {
    token.replace(ESCAPED_SPACE_PLACEHOLDER, " ")
}
