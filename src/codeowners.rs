use tracing::{debug, instrument};

mod aggregator;
mod matcher;
mod owner;
mod parser;
mod resolver;
mod summary;

pub use aggregator::{PatternGroup, active_pattern_groups};
pub use matcher::{MatchKind, PatternSet};
pub use owner::{AccessibleOwners, Owner, OwnerKind, role_access_level};
pub use parser::{CodeownersFile, OwnershipRule, Parser, Section};
pub use resolver::{DEFAULT_SECTION, MatchingPattern, SectionOwnership};
pub use summary::{ApprovalSummary, PatternApproval};

use crate::gitlab::Member;

/// A parsed CODEOWNERS document bound to the accessibility set of the
/// project it is being checked against. Built once per check.
pub struct Codeowners {
    file: CodeownersFile,
}

impl Codeowners {
    #[instrument(level = "debug", skip_all)]
    pub fn parse(text: &str, members: &[Member]) -> Self {
        let accessible = AccessibleOwners::from_members(members);
        let file = Parser::new().with_accessible_owners(accessible).parse(text);
        debug!(
            sections = file.sections.len(),
            default_rules = file.default_rules.len(),
            parse_errors = file.parse_errors.len(),
            "parsed CODEOWNERS"
        );
        Self { file }
    }

    /// Per-section ownership of one file.
    pub fn owners_for_file(&self, file_path: &str) -> Vec<SectionOwnership> {
        self.file.owners_for_file(file_path)
    }

    /// Changed files grouped by their active matching pattern.
    pub fn pattern_groups(&self, paths: &[String]) -> Vec<PatternGroup> {
        active_pattern_groups(&self.file, paths)
    }

    pub fn parse_errors(&self) -> &[String] {
        &self.file.parse_errors
    }
}
