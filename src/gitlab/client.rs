use std::collections::HashMap;

use chrono::{DateTime, Utc};
use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};
use urlencoding::encode;

use super::{ApprovalInfo, ApprovalStatus, Approvals, Commit, DISCUSSION_MARKER, Error, Member, MergeRequest};

const APPROVED_NOTE: &str = "approved this merge request";
const UNAPPROVED_NOTE: &str = "unapproved this merge request";
const PER_PAGE: usize = 100;

/// Commit status states the bot reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Success,
    Failed,
}

impl CommitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitState::Success => "success",
            CommitState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Note {
    id: u64,
    body: String,
    system: bool,
    author: NoteAuthor,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    resolved: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct NoteAuthor {
    id: u64,
    username: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Discussion {
    id: String,
    notes: Vec<Note>,
}

#[derive(Debug, Deserialize)]
struct RepositoryFile {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Diff {
    #[serde(default)]
    new_path: String,
    #[serde(default)]
    old_path: String,
}

/// REST adapter for the Git host. All operations the core needs, nothing
/// more; callers never see `reqwest` types.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl Client {
    pub fn new(token: &str, base_url: &str, insecure: bool) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build().change_context(Error::Construction)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub async fn get_merge_request(&self, project: &str, mr_iid: u64) -> Result<MergeRequest, Error> {
        self.get_json(&format!(
            "projects/{}/merge_requests/{mr_iid}",
            encode(project)
        ))
        .await
    }

    pub async fn list_merge_request_commits(
        &self,
        project: &str,
        mr_iid: u64,
    ) -> Result<Vec<Commit>, Error> {
        self.get_paginated(&format!(
            "projects/{}/merge_requests/{mr_iid}/commits",
            encode(project)
        ))
        .await
    }

    pub async fn list_project_members(&self, project: &str) -> Result<Vec<Member>, Error> {
        self.get_paginated(&format!("projects/{}/members/all", encode(project)))
            .await
    }

    /// Base64 content of a repository file at `ref_name`.
    pub async fn get_file(&self, project: &str, path: &str, ref_name: &str) -> Result<String, Error> {
        let file: RepositoryFile = self
            .get_json(&format!(
                "projects/{}/repository/files/{}?ref={}",
                encode(project),
                encode(path),
                encode(ref_name)
            ))
            .await?;
        Ok(file.content)
    }

    /// The paths touched by the MR (new path, or old path for deletions).
    pub async fn get_all_diffs_paths(&self, project: &str, mr_iid: u64) -> Result<Vec<String>, Error> {
        let diffs: Vec<Diff> = self
            .get_paginated(&format!(
                "projects/{}/merge_requests/{mr_iid}/diffs",
                encode(project)
            ))
            .await?;
        Ok(diffs
            .into_iter()
            .map(|diff| {
                if diff.new_path.is_empty() {
                    diff.old_path
                } else {
                    diff.new_path
                }
            })
            .filter(|path| !path.is_empty())
            .collect())
    }

    /// Per-user approval state inferred from system notes, keeping the
    /// latest note per user.
    pub async fn list_merge_request_approvals(
        &self,
        project: &str,
        mr_iid: u64,
    ) -> Result<Approvals, Error> {
        let notes: Vec<Note> = self
            .get_paginated(&format!(
                "projects/{}/merge_requests/{mr_iid}/notes",
                encode(project)
            ))
            .await?;
        Ok(approvals_from_notes(&notes))
    }

    /// Post the compliance report, idempotently: an existing note carrying
    /// the marker string is updated in place and its discussion resolved
    /// to match `passed`; otherwise a fresh discussion is created.
    #[instrument(level = "debug", skip(self, body))]
    pub async fn create_or_update_discussion(
        &self,
        project: &str,
        mr_iid: u64,
        body: &str,
        passed: bool,
    ) -> Result<(), Error> {
        let discussions: Vec<Discussion> = self
            .get_paginated(&format!(
                "projects/{}/merge_requests/{mr_iid}/discussions",
                encode(project)
            ))
            .await?;

        for discussion in &discussions {
            for note in &discussion.notes {
                if note.system || note.body.is_empty() || !note.body.contains(DISCUSSION_MARKER) {
                    continue;
                }
                self.put(
                    &format!(
                        "projects/{}/merge_requests/{mr_iid}/notes/{}",
                        encode(project),
                        note.id
                    ),
                    &json!({ "body": body }),
                )
                .await?;
                if note.resolved != passed {
                    self.put(
                        &format!(
                            "projects/{}/merge_requests/{mr_iid}/discussions/{}",
                            encode(project),
                            discussion.id
                        ),
                        &json!({ "resolved": passed }),
                    )
                    .await?;
                }
                debug!(note_id = note.id, "updated compliance discussion");
                return Ok(());
            }
        }

        self.post(
            &format!("projects/{}/merge_requests/{mr_iid}/discussions", encode(project)),
            &json!({ "body": body }),
        )
        .await?;
        info!(project, mr_iid, "created compliance discussion");
        Ok(())
    }

    pub async fn set_commit_status(
        &self,
        project: &str,
        sha: &str,
        state: CommitState,
        description: &str,
    ) -> Result<(), Error> {
        self.post(
            &format!("projects/{}/statuses/{sha}", encode(project)),
            &json!({ "state": state.as_str(), "description": description }),
        )
        .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .change_context_lazy(|| Error::Http(path.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                path: path.to_string(),
            }
            .into());
        }
        response
            .json()
            .await
            .change_context_lazy(|| Error::Decode(path.to_string()))
    }

    async fn get_paginated<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, Error> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let chunk: Vec<T> = self
                .get_json(&format!("{path}{separator}per_page={PER_PAGE}&page={page}"))
                .await?;
            let len = chunk.len();
            items.extend(chunk);
            if len < PER_PAGE {
                return Ok(items);
            }
            page += 1;
        }
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<(), Error> {
        self.send(self.http.post(self.url(path)), path, body).await
    }

    async fn put(&self, path: &str, body: &serde_json::Value) -> Result<(), Error> {
        self.send(self.http.put(self.url(path)), path, body).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), Error> {
        let response = request
            .header("PRIVATE-TOKEN", &self.token)
            .json(body)
            .send()
            .await
            .change_context_lazy(|| Error::Http(path.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                path: path.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4/{path}", self.base_url)
    }
}

/// The single place that knows the note bodies GitLab emits on approval
/// changes. Swap for a first-class approvals endpoint when available.
fn approval_status_from_note(note: &Note) -> Option<ApprovalStatus> {
    if !note.system {
        return None;
    }
    match note.body.trim() {
        APPROVED_NOTE => Some(ApprovalStatus::Approved),
        UNAPPROVED_NOTE => Some(ApprovalStatus::Unapproved),
        _ => None,
    }
}

fn approvals_from_notes(notes: &[Note]) -> Approvals {
    let mut per_user: HashMap<u64, ApprovalInfo> = HashMap::new();

    for note in notes {
        let Some(status) = approval_status_from_note(note) else {
            continue;
        };
        let candidate = ApprovalInfo {
            user_id: note.author.id,
            username: note.author.username.clone(),
            status,
            updated_at: note.updated_at,
        };
        per_user
            .entry(note.author.id)
            .and_modify(|existing| {
                if note.updated_at >= existing.updated_at {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }

    let count = per_user
        .values()
        .filter(|approval| approval.status.is_approved())
        .count() as u32;
    Approvals { count, per_user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn note(id: u64, user: u64, body: &str, system: bool, minute: u32) -> Note {
        Note {
            id,
            body: body.to_string(),
            system,
            author: NoteAuthor {
                id: user,
                username: format!("user{user}"),
            },
            updated_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap(),
            resolved: false,
        }
    }

    #[test]
    fn latest_note_per_user_wins() {
        let notes = vec![
            note(1, 7, APPROVED_NOTE, true, 0),
            note(2, 7, UNAPPROVED_NOTE, true, 5),
            note(3, 9, APPROVED_NOTE, true, 2),
        ];
        let approvals = approvals_from_notes(&notes);
        assert_eq!(approvals.count, 1);
        assert_eq!(approvals.per_user[&7].status, ApprovalStatus::Unapproved);
        assert_eq!(approvals.per_user[&9].status, ApprovalStatus::Approved);
    }

    #[test]
    fn reapproval_counts_again() {
        let notes = vec![
            note(1, 7, APPROVED_NOTE, true, 0),
            note(2, 7, UNAPPROVED_NOTE, true, 1),
            note(3, 7, APPROVED_NOTE, true, 2),
        ];
        let approvals = approvals_from_notes(&notes);
        assert_eq!(approvals.count, 1);
        assert_eq!(approvals.per_user[&7].status, ApprovalStatus::Approved);
    }

    #[test]
    fn non_system_and_unrelated_notes_are_ignored() {
        let notes = vec![
            note(1, 7, APPROVED_NOTE, false, 0),
            note(2, 8, "looks good to me", true, 1),
        ];
        let approvals = approvals_from_notes(&notes);
        assert_eq!(approvals.count, 0);
        assert!(approvals.per_user.is_empty());
    }

    #[test]
    fn commit_states_serialise_to_api_values() {
        assert_eq!(CommitState::Success.as_str(), "success");
        assert_eq!(CommitState::Failed.as_str(), "failed");
    }
}
