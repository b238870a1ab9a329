use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::{AppState, SERVICE_NAME};
use crate::gitlab::{EVENT_MERGE_REQUEST, is_event_subscribed, parse_merge_event};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

/// Validate, authenticate and parse an incoming webhook; merge events are
/// enqueued, other subscribed events are acknowledged and dropped.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let secret = &state.config.gitlab.secret_token;
    if !secret.is_empty() {
        let token = header_value(&headers, "X-Gitlab-Token");
        if token != secret.as_str() {
            warn!("webhook secret token mismatch");
            return bad_request("Secret token validation failed");
        }
    }

    let event = header_value(&headers, "X-Gitlab-Event");
    if event.trim().is_empty() {
        warn!("missing X-Gitlab-Event header");
        return bad_request("Missing X-Gitlab-Event header");
    }

    if body.is_empty() {
        warn!("empty webhook payload");
        return bad_request("Failed to read request payload");
    }

    if !is_event_subscribed(event) {
        warn!(event, "event not defined to be parsed");
        return bad_request("Event not defined to be parsed");
    }

    if event != EVENT_MERGE_REQUEST {
        // Subscribed but not actionable (note hooks); accept and drop.
        if serde_json::from_slice::<Value>(&body).is_err() {
            return bad_request("Invalid webhook payload");
        }
        return (StatusCode::OK, Json(json!({ "message": "Event ignored" })));
    }

    let parsed = match parse_merge_event(&body) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!(?reason, "failed to parse webhook event");
            return bad_request("Invalid webhook payload");
        }
    };

    info!(
        project_id = parsed.project.id,
        mr_iid = parsed.object_attributes.iid,
        action = %parsed.object_attributes.action,
        "processing merge request event"
    );

    let webhook_type = parsed.event_type.clone();
    match state.queue.enqueue(parsed, &webhook_type).await {
        Ok(job_id) => {
            info!(%job_id, "webhook enqueued successfully");
            (
                StatusCode::OK,
                Json(json!({ "message": "Webhook enqueued", "job_id": job_id })),
            )
        }
        Err(reason) => {
            error!(?reason, "failed to enqueue webhook event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to enqueue webhook" })),
            )
        }
    }
}

/// Run a synchronous check and report the result without posting
/// anything back to the MR.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path((project_id, mr_id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    let Ok(mr_iid) = mr_id.parse::<u64>() else {
        return bad_request("Invalid MR ID");
    };

    match state.checker.check_merge_request(&project_id, mr_iid).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "passed": result.passed,
                "failures": result.failures,
                "summary": result.summary,
            })),
        ),
        Err(reason) => {
            error!(project_id, mr_iid, ?reason, "failed to check merge request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Check failed" })),
            )
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::conformity::Checker;
    use crate::gitlab::Client;
    use crate::queue::QueueManager;
    use crate::server::router;
    use crate::storage::{MemoryStore, Store};
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn state(secret: &str) -> Arc<AppState> {
        let mut config = Config::default();
        config.gitlab.secret_token = secret.to_string();
        let client = Arc::new(Client::new("", "https://gitlab.example.com", false).unwrap());
        let checker = Arc::new(Checker::new(config.rules.clone(), client));
        let queue = Arc::new(QueueManager::new(&config.redis).unwrap());
        let store = Arc::new(Store::from(MemoryStore::default()));
        Arc::new(AppState {
            config,
            checker,
            queue,
            store,
        })
    }

    async fn send(request: Request<Body>, secret: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state(secret)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(request, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn webhook_rejects_wrong_secret() {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Gitlab-Token", "wrong")
            .header("X-Gitlab-Event", EVENT_MERGE_REQUEST)
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(request, "expected").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Secret token validation failed");
    }

    #[tokio::test]
    async fn webhook_requires_event_header() {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(request, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_rejects_unsubscribed_events() {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Gitlab-Event", "Pipeline Hook")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(request, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Event not defined to be parsed");
    }

    #[tokio::test]
    async fn webhook_accepts_and_ignores_note_events() {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Gitlab-Event", "Note Hook")
            .body(Body::from(r#"{"object_kind":"note"}"#))
            .unwrap();
        let (status, body) = send(request, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Event ignored");
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_merge_payload() {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Gitlab-Event", EVENT_MERGE_REQUEST)
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(request, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid webhook payload");
    }

    #[tokio::test]
    async fn status_rejects_non_numeric_mr_id() {
        let request = Request::builder()
            .uri("/status/42/not-a-number")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid MR ID");
    }
}
