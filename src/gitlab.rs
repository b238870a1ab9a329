use core::fmt;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use error_stack::Context;
use serde::Deserialize;

mod client;
mod webhook;

pub use client::{Client, CommitState};
pub use webhook::{
    EVENT_MERGE_REQUEST, EVENT_NOTE, MergeEvent, ObjectAttributes, is_event_subscribed,
    parse_merge_event,
};

/// The literal marker that makes the compliance discussion findable on
/// subsequent runs.
pub const DISCUSSION_MARKER: &str = "MR Conformity Check Summary";

#[derive(Debug)]
pub enum Error {
    Construction,
    Http(String),
    Api { status: u16, path: String },
    Decode(String),
}

impl Context for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Construction => f.write_str("failed to construct GitLab client"),
            Error::Http(path) => write!(f, "request to {path} failed"),
            Error::Api { status, path } => write!(f, "GitLab returned {status} for {path}"),
            Error::Decode(what) => write!(f, "failed to decode {what}"),
        }
    }
}

/// A merge request, reduced to the fields the rules consume.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default, alias = "squash")]
    pub squash_on_merge: bool,
    /// Head commit SHA of the MR.
    #[serde(default)]
    pub sha: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub id: String,
    pub short_id: String,
    pub message: String,
    #[serde(default)]
    pub web_url: String,
}

/// A project member as returned by the membership listing. The email is
/// only visible with sufficient token permissions.
#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub access_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Approved,
    Unapproved,
}

impl ApprovalStatus {
    pub fn is_approved(self) -> bool {
        self == ApprovalStatus::Approved
    }
}

/// The latest approval state of one user, derived from system notes.
#[derive(Debug, Clone)]
pub struct ApprovalInfo {
    pub user_id: u64,
    pub username: String,
    pub status: ApprovalStatus,
    pub updated_at: DateTime<Utc>,
}

/// Current approval state of a merge request: the number of approving
/// users and the per-user detail keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct Approvals {
    pub count: u32,
    pub per_user: HashMap<u64, ApprovalInfo>,
}
