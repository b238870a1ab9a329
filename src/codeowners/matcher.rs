use std::collections::HashMap;
use std::fmt::{self, Display};

use glob::{MatchOptions, Pattern};

use crate::path_utils;

/// `*` and `?` stay within one path segment; `**` crosses segments.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

const WILDCARD_CHARS: [char; 4] = ['*', '?', '[', '{'];

/// How a pattern matched a path, classified from the pattern text alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Glob,
    Directory,
    Globstar,
}

impl MatchKind {
    pub fn of(pattern: &str) -> Self {
        if pattern.contains("**") {
            MatchKind::Globstar
        } else if pattern.ends_with('/') {
            MatchKind::Directory
        } else if !pattern.contains(WILDCARD_CHARS) {
            MatchKind::Exact
        } else {
            MatchKind::Glob
        }
    }
}

impl Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Exact => write!(f, "exact"),
            MatchKind::Glob => write!(f, "glob"),
            MatchKind::Directory => write!(f, "directory"),
            MatchKind::Globstar => write!(f, "globstar"),
        }
    }
}

/// Compiled patterns for one CODEOWNERS document. Unparsable patterns
/// compile to `None` and never match.
#[derive(Debug, Default)]
pub struct PatternSet {
    compiled: HashMap<String, Option<Pattern>>,
}

impl PatternSet {
    pub fn compile(&mut self, pattern: &str) {
        if self.compiled.contains_key(pattern) {
            return;
        }
        let target = glob_target(pattern).map(Pattern::new);
        self.compiled
            .insert(pattern.to_string(), target.and_then(Result::ok));
    }

    /// The compile error for a pattern that needs the glob engine, if any.
    pub fn compile_error(pattern: &str) -> Option<glob::PatternError> {
        glob_target(pattern).and_then(|target| Pattern::new(target).err())
    }

    /// Does `pattern` match `file_path`?
    ///
    /// Absolute patterns are anchored at the repository root; directory
    /// patterns match the directory itself and everything under it;
    /// relative patterns are tried against every suffix of the path's
    /// segment list.
    pub fn matches(&self, pattern: &str, file_path: &str) -> bool {
        let path = path_utils::normalize(file_path);

        if let Some(anchored) = pattern.strip_prefix('/') {
            if let Some(dir) = anchored.strip_suffix('/') {
                return dir_match(dir, &path);
            }
            return self.glob_match(pattern, anchored, &path);
        }

        if let Some(dir) = pattern.strip_suffix('/') {
            return dir_match(dir, &path);
        }

        path_utils::suffixes(&path)
            .iter()
            .any(|suffix| self.glob_match(pattern, pattern, suffix))
    }

    fn glob_match(&self, key: &str, pattern: &str, candidate: &str) -> bool {
        match self.compiled.get(key) {
            Some(Some(compiled)) => compiled.matches_with(candidate, MATCH_OPTIONS),
            Some(None) => false,
            None => Pattern::new(pattern)
                .map(|compiled| compiled.matches_with(candidate, MATCH_OPTIONS))
                .unwrap_or(false),
        }
    }
}

/// The string handed to the glob engine for `pattern`, or `None` when the
/// pattern is resolved by plain string comparison (directory patterns).
fn glob_target(pattern: &str) -> Option<&str> {
    let anchored = pattern.strip_prefix('/').unwrap_or(pattern);
    if anchored.ends_with('/') {
        None
    } else {
        Some(anchored)
    }
}

fn dir_match(dir: &str, path: &str) -> bool {
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}
