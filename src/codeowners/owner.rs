use std::collections::HashSet;
use std::fmt::{self, Display};

use lazy_static::lazy_static;
use regex::Regex;

use crate::gitlab::Member;

lazy_static! {
    static ref ROLE_REGEX: Regex = Regex::new(r"^@@([a-zA-Z0-9_.][a-zA-Z0-9_.-]*)$").unwrap();
    static ref USER_OR_GROUP_REGEX: Regex = Regex::new(r"^@([a-zA-Z0-9_./-]+)$").unwrap();
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

/// Role names and the GitLab access level each one requires.
const ROLE_LEVELS: [(&str, u32); 6] = [
    ("developer", ACCESS_LEVEL_DEVELOPER),
    ("developers", ACCESS_LEVEL_DEVELOPER),
    ("maintainer", ACCESS_LEVEL_MAINTAINER),
    ("maintainers", ACCESS_LEVEL_MAINTAINER),
    ("owner", ACCESS_LEVEL_OWNER),
    ("owners", ACCESS_LEVEL_OWNER),
];

pub const ACCESS_LEVEL_DEVELOPER: u32 = 30;
pub const ACCESS_LEVEL_MAINTAINER: u32 = 40;
pub const ACCESS_LEVEL_OWNER: u32 = 50;

/// The access level required to satisfy a role owner, `None` for an
/// unknown role name. Accepts `@@`/`@`-prefixed spellings.
pub fn role_access_level(role: &str) -> Option<u32> {
    let name = role.trim_start_matches('@').to_lowercase();
    ROLE_LEVELS
        .iter()
        .find(|(role_name, _)| *role_name == name)
        .map(|(_, level)| *level)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    User,
    Group,
    Role,
}

/// A single owner token from a CODEOWNERS rule or section header.
///
/// `@name` tokens parse as groups; whether they name a user or a group is
/// refined later against the accessibility set. Equality is by
/// `(kind, name)` only.
#[derive(Debug, Clone)]
pub struct Owner {
    pub kind: OwnerKind,
    /// Normalised name: `@`/`@@` prefix stripped, roles lower-cased.
    pub name: String,
    /// The verbatim token as written in the file.
    pub original: String,
    pub is_email: bool,
    pub is_nested: bool,
    pub is_valid: bool,
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.name == other.name
    }
}

impl Eq for Owner {}

#[derive(Debug, PartialEq, Eq)]
pub enum OwnerParseError {
    InvalidRole(String),
    Malformed(String),
}

impl Display for OwnerParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerParseError::InvalidRole(name) => write!(f, "invalid role: {name}"),
            OwnerParseError::Malformed(token) => write!(f, "malformed owner: {token}"),
        }
    }
}

impl Owner {
    pub fn parse(token: &str) -> Result<Self, OwnerParseError> {
        if let Some(captures) = ROLE_REGEX.captures(token) {
            let name = captures[1].to_lowercase();
            if role_access_level(&name).is_none() {
                return Err(OwnerParseError::InvalidRole(name));
            }
            return Ok(Owner {
                kind: OwnerKind::Role,
                name,
                original: token.to_string(),
                is_email: false,
                is_nested: false,
                is_valid: false,
            });
        }

        if let Some(captures) = USER_OR_GROUP_REGEX.captures(token) {
            let name = captures[1].to_string();
            let is_nested = name.contains('/');
            return Ok(Owner {
                kind: OwnerKind::Group,
                is_nested,
                name,
                original: token.to_string(),
                is_email: false,
                is_valid: false,
            });
        }

        if EMAIL_REGEX.is_match(token) {
            return Ok(Owner {
                kind: OwnerKind::User,
                name: token.to_string(),
                original: token.to_string(),
                is_email: true,
                is_nested: false,
                is_valid: false,
            });
        }

        Err(OwnerParseError::Malformed(token.to_string()))
    }

    pub fn is_role(&self) -> bool {
        self.kind == OwnerKind::Role
    }
}

impl Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.is_valid { "" } else { " (inaccessible)" };
        match self.kind {
            OwnerKind::Role => write!(f, "@@{}{}", self.name, suffix),
            OwnerKind::Group => write!(f, "@{}{}", self.name, suffix),
            OwnerKind::User if self.is_email => write!(f, "{}{}", self.name, suffix),
            OwnerKind::User => write!(f, "@{}{}", self.name, suffix),
        }
    }
}

/// The owners considered valid approvers for one project, split by type.
///
/// Built from project membership: each member contributes their username,
/// their email, and every role name whose access level they meet.
#[derive(Debug, Clone, Default)]
pub struct AccessibleOwners {
    users: HashSet<String>,
    groups: HashSet<String>,
    roles: HashSet<String>,
    emails: HashSet<String>,
    role_level: u32,
}

impl AccessibleOwners {
    pub fn from_members(members: &[Member]) -> Self {
        let mut accessible = Self::default();
        for member in members {
            accessible.add_user(&member.username);
            if let Some(email) = &member.email {
                accessible.add_email(email);
            }
            accessible.add_role_level(member.access_level);
        }
        accessible
    }

    pub fn add_user(&mut self, username: &str) {
        self.users
            .insert(username.trim_start_matches('@').to_string());
    }

    pub fn add_group(&mut self, group: &str) {
        self.groups.insert(group.trim_start_matches('@').to_string());
    }

    pub fn add_email(&mut self, email: &str) {
        self.emails.insert(email.to_string());
    }

    /// Make every role at or below `access_level` accessible.
    pub fn add_role_level(&mut self, access_level: u32) {
        self.role_level = self.role_level.max(access_level);
        for (role_name, level) in ROLE_LEVELS {
            if level <= access_level {
                self.roles.insert(role_name.to_string());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty() && self.roles.is_empty() && self.emails.is_empty()
    }

    /// Is `owner` a valid approver for this project?
    ///
    /// With an empty set, roles are accessible and everything else
    /// depends on the strictness mode.
    pub fn is_accessible(&self, owner: &Owner, strict: bool) -> bool {
        match owner.kind {
            OwnerKind::Role => {
                if self.is_empty() {
                    return true;
                }
                self.roles.contains(&owner.name)
            }
            OwnerKind::User => {
                if self.is_empty() {
                    return !strict;
                }
                if owner.is_email {
                    self.emails.contains(&owner.name)
                } else {
                    self.users.contains(&owner.name)
                }
            }
            OwnerKind::Group => {
                if self.is_empty() {
                    return !strict;
                }
                if owner.is_nested {
                    self.groups.contains(&owner.name)
                } else {
                    self.users.contains(&owner.name) || self.groups.contains(&owner.name)
                }
            }
        }
    }
}
