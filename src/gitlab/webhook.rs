use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};

use super::Error;

/// Webhook event kinds the bot subscribes to, as sent in the
/// `X-Gitlab-Event` header.
pub const EVENT_MERGE_REQUEST: &str = "Merge Request Hook";
pub const EVENT_NOTE: &str = "Note Hook";

pub fn is_event_subscribed(event: &str) -> bool {
    event == EVENT_MERGE_REQUEST || event == EVENT_NOTE
}

/// The merge-request webhook envelope, reduced to the attributes the
/// pipeline consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeEvent {
    pub object_kind: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub user: Option<EventUser>,
    pub project: EventProject,
    pub object_attributes: ObjectAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventUser {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventProject {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub iid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub last_commit: Option<LastCommit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

impl MergeEvent {
    pub fn is_merge_request_event(&self) -> bool {
        self.object_kind == "merge_request"
    }

    /// Only opened, reopened and updated MRs warrant a check.
    pub fn is_relevant_action(&self) -> bool {
        matches!(self.object_attributes.action.as_str(), "open" | "reopen" | "update")
    }
}

pub fn parse_merge_event(payload: &[u8]) -> Result<MergeEvent, Error> {
    serde_json::from_slice(payload)
        .change_context(Error::Decode("webhook payload".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge_event_payload(action: &str) -> Vec<u8> {
        json!({
            "object_kind": "merge_request",
            "event_type": "merge_request",
            "user": { "id": 1, "username": "alice" },
            "project": { "id": 42, "name": "widgets", "path_with_namespace": "acme/widgets" },
            "object_attributes": {
                "iid": 7,
                "title": "feat: add widget",
                "state": "opened",
                "action": action,
                "source_branch": "feature/widget",
                "target_branch": "main",
                "last_commit": { "id": "abc123", "message": "feat: add widget" }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn parses_merge_event_payload() {
        let event = parse_merge_event(&merge_event_payload("open")).unwrap();
        assert!(event.is_merge_request_event());
        assert!(event.is_relevant_action());
        assert_eq!(event.project.id, 42);
        assert_eq!(event.object_attributes.iid, 7);
        assert_eq!(event.object_attributes.last_commit.unwrap().id, "abc123");
    }

    #[test]
    fn close_actions_are_not_relevant() {
        let event = parse_merge_event(&merge_event_payload("close")).unwrap();
        assert!(!event.is_relevant_action());
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_merge_event(b"{not json").is_err());
    }

    #[test]
    fn subscribed_events_are_recognised() {
        assert!(is_event_subscribed(EVENT_MERGE_REQUEST));
        assert!(is_event_subscribed(EVENT_NOTE));
        assert!(!is_event_subscribed("Pipeline Hook"));
    }
}
