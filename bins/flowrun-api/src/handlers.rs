// HTTP route handlers for the flowrun API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use flowrun_common::gateway::{GatewayError, SubmitRequest, ValidationError};
use flowrun_common::types::{ErrorKind, ExecutionResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub submission_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub language_id: u32,
    pub name: &'static str,
    pub image: String,
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn rejection_reason(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::UnsupportedLanguage(_) => "unsupported_language",
        ValidationError::EmptyCode => "empty_code",
        ValidationError::CodeTooLarge(_) => "code_too_large",
        ValidationError::InputTooLarge(_) => "input_too_large",
    }
}

/// Map gateway failures onto status codes
fn gateway_error_response(err: GatewayError) -> Response {
    match err {
        GatewayError::Invalid(invalid) => {
            metrics::REJECTED_TOTAL.with_label_values(&[rejection_reason(&invalid)]).inc();
            warn!(error = %invalid, "Submission rejected");
            error_body(StatusCode::BAD_REQUEST, invalid.to_string())
        }
        GatewayError::Queue(e) => {
            error!(error = %e, "Job queue unavailable");
            error_body(StatusCode::SERVICE_UNAVAILABLE, format!("Job queue unavailable: {}", e))
        }
        GatewayError::Timeout { submission_id } => {
            metrics::RESULTS_TOTAL.with_label_values(&[ErrorKind::Timeout.as_str()]).inc();
            result_response(ExecutionResult::failed(submission_id, ErrorKind::Timeout, String::new()))
        }
    }
}

fn result_response(result: ExecutionResult) -> Response {
    let status = if result.error_kind == ErrorKind::Timeout {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    (status, Json(result)).into_response()
}

fn language_label(request: &SubmitRequest) -> String {
    request.language_id.to_string()
}

/// POST /submissions - Run code and wait for its result
pub async fn submit(State(state): State<Arc<AppState>>, Json(payload): Json<SubmitRequest>) -> Response {
    let language = language_label(&payload);
    let started = Instant::now();

    let submission_id = match state.gateway.enqueue(payload).await {
        Ok(id) => id,
        Err(e) => return gateway_error_response(e),
    };
    metrics::SUBMISSIONS_TOTAL.with_label_values(&[language.as_str()]).inc();

    let outcome = state.gateway.wait_for_result(submission_id).await;
    metrics::WAIT_SECONDS.observe(started.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => {
            metrics::RESULTS_TOTAL.with_label_values(&[result.error_kind.as_str()]).inc();
            info!(
                submission_id = %submission_id,
                error_kind = ?result.error_kind,
                exit_code = ?result.exit_code,
                "Result returned"
            );
            result_response(result)
        }
        Err(e) => gateway_error_response(e),
    }
}

/// POST /submissions/async - Queue code and return its submission id at once
pub async fn submit_async(State(state): State<Arc<AppState>>, Json(payload): Json<SubmitRequest>) -> Response {
    let language = language_label(&payload);
    match state.gateway.enqueue(payload).await {
        Ok(submission_id) => {
            metrics::SUBMISSIONS_TOTAL.with_label_values(&[language.as_str()]).inc();
            (StatusCode::ACCEPTED, Json(SubmitResponse { submission_id })).into_response()
        }
        Err(e) => gateway_error_response(e),
    }
}

/// GET /submissions/:id - Collect a result queued with the async endpoint
///
/// A result is handed out once; later requests for the same id report it as pending.
pub async fn get_submission(State(state): State<Arc<AppState>>, Path(submission_id): Path<String>) -> Response {
    let submission_id = match Uuid::parse_str(&submission_id) {
        Ok(id) => id,
        Err(_) => return error_body(StatusCode::BAD_REQUEST, "Invalid submission ID format".to_string()),
    };

    match state.gateway.try_result(&submission_id).await {
        Ok(Some(result)) => {
            metrics::RESULTS_TOTAL.with_label_values(&[result.error_kind.as_str()]).inc();
            info!(submission_id = %submission_id, error_kind = ?result.error_kind, "Result retrieved");
            result_response(result)
        }
        Ok(None) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "submissionId": submission_id,
                "status": "pending",
                "message": "Submission is queued or still executing"
            })),
        )
            .into_response(),
        Err(e) => gateway_error_response(e),
    }
}

/// GET /languages - Languages this deployment accepts
pub async fn list_languages(State(state): State<Arc<AppState>>) -> Json<Vec<LanguageInfo>> {
    let languages = state
        .gateway
        .registry()
        .list()
        .into_iter()
        .map(|spec| LanguageInfo {
            language_id: spec.language_id.code(),
            name: spec.language_id.name(),
            image: spec.image.clone(),
        })
        .collect();
    Json(languages)
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use crate::{routes, AppState};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use flowrun_common::config::{GatewayConfig, MAX_STDIN_BYTES};
    use flowrun_common::gateway::Gateway;
    use flowrun_common::language::LanguageRegistry;
    use flowrun_common::queue::{JobQueue, MemoryQueue};
    use flowrun_common::types::{ErrorKind, ExecutionResult};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(queue: Arc<MemoryQueue>, deadline: Duration) -> Router {
        let config = GatewayConfig {
            result_deadline: deadline,
            poll_interval: Duration::from_millis(10),
            ..GatewayConfig::default()
        };
        let body_limit = config.max_request_bytes();
        let gateway = Gateway::new(queue, Arc::new(LanguageRegistry::builtin()), config);
        routes::routes(body_limit).with_state(Arc::new(AppState { gateway }))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_worker_result() {
        let queue = Arc::new(MemoryQueue::new());
        let worker_queue = queue.clone();
        tokio::spawn(async move {
            let job = worker_queue.dequeue_job(Duration::from_secs(5)).await.unwrap().unwrap();
            let output = format!("{}\n", job.stdin.unwrap_or_default());
            worker_queue
                .publish_result(&ExecutionResult::new(job.submission_id, output, Some(0), ErrorKind::None))
                .await
                .unwrap();
        });

        let response = app(queue, Duration::from_secs(5))
            .oneshot(post_json(
                "/submissions",
                serde_json::json!({ "code": "print(input())", "input": "hello", "languageId": 71 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["output"], "hello\n");
        assert_eq!(body["exitCode"], 0);
        assert_eq!(body["errorKind"], "None");
        assert!(body["submissionId"].is_string());
    }

    #[tokio::test]
    async fn test_unsupported_language_is_bad_request() {
        let queue = Arc::new(MemoryQueue::new());
        let response = app(queue.clone(), Duration::from_secs(5))
            .oneshot(post_json("/submissions", serde_json::json!({ "code": "x", "languageId": 1 })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("unsupported language"));
        assert_eq!(queue.pending_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_input_is_rejected_by_validation() {
        let queue = Arc::new(MemoryQueue::new());
        let input = "x".repeat(MAX_STDIN_BYTES + 1);
        let response = app(queue.clone(), Duration::from_secs(5))
            .oneshot(post_json(
                "/submissions",
                serde_json::json!({ "code": "print(input())", "input": input, "languageId": 71 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("input exceeds maximum size"));
        assert_eq!(queue.pending_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deadline_is_gateway_timeout() {
        let queue = Arc::new(MemoryQueue::new());
        let response = app(queue, Duration::from_millis(50))
            .oneshot(post_json(
                "/submissions",
                serde_json::json!({ "code": "while True: pass", "languageId": 71 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = json_body(response).await;
        assert_eq!(body["errorKind"], "Timeout");
        assert!(body["exitCode"].is_null());
    }

    #[tokio::test]
    async fn test_async_submission_flow() {
        let queue = Arc::new(MemoryQueue::new());
        let router = app(queue.clone(), Duration::from_secs(5));

        let response = router
            .clone()
            .oneshot(post_json(
                "/submissions/async",
                serde_json::json!({ "code": "console.log(1)", "languageId": 63 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id: Uuid = json_body(response).await["submissionId"].as_str().unwrap().parse().unwrap();

        let uri = format!("/submissions/{}", id);
        let pending = router.clone().oneshot(Request::get(&uri).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(pending.status(), StatusCode::ACCEPTED);

        queue
            .publish_result(&ExecutionResult::new(id, "1\n", Some(0), ErrorKind::None))
            .await
            .unwrap();
        let ready = router.oneshot(Request::get(&uri).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        assert_eq!(json_body(ready).await["output"], "1\n");
    }

    #[tokio::test]
    async fn test_malformed_submission_id() {
        let response = app(Arc::new(MemoryQueue::new()), Duration::from_secs(5))
            .oneshot(Request::get("/submissions/not-a-uuid").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_languages_listed_in_id_order() {
        let response = app(Arc::new(MemoryQueue::new()), Duration::from_secs(5))
            .oneshot(Request::get("/languages").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let ids: Vec<u64> = body.as_array().unwrap().iter().map(|l| l["languageId"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![54, 63, 71]);
    }
}
