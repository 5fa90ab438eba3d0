//! Axum glue: the activity middleware for the host's router and a small
//! operator router for status and manual resets.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::{activity::ActivityRecorder, errors::ResetError, swap::SwapReport, DemoReset, DemoStatus};

const OPERATOR_HEADER: &str = "x-demo-operator";

/// Wrap `router` so qualifying requests stamp the activity clock once the
/// handler has produced its response.
pub fn activity_layer<S>(router: Router<S>, recorder: ActivityRecorder) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(recorder, track_activity))
}

async fn track_activity(
    State(recorder): State<ActivityRecorder>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let authenticated = carries_credentials(req.headers());
    let response = next.run(req).await;
    recorder.observe(&method, authenticated).await;
    response
}

fn carries_credentials(headers: &HeaderMap) -> bool {
    headers.contains_key(header::AUTHORIZATION) || headers.contains_key(header::COOKIE)
}

/// `GET /demo/status` and the token-gated `POST /demo/reset`.
pub fn admin_router(demo: DemoReset) -> Router {
    Router::new()
        .route("/demo/status", get(status_handler))
        .route("/demo/reset", post(reset_handler))
        .with_state(demo)
}

#[derive(Debug)]
enum ApiError {
    ResetDisabled,
    Unauthorized,
    Reset(ResetError),
}

impl From<ResetError> for ApiError {
    fn from(err: ResetError) -> Self {
        Self::Reset(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::ResetDisabled => (
                StatusCode::FORBIDDEN,
                "reset_disabled",
                "no operator token configured".to_string(),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid operator token".to_string(),
            ),
            ApiError::Reset(err @ ResetError::SwapInProgress) => {
                (StatusCode::CONFLICT, "swap_in_progress", err.to_string())
            }
            ApiError::Reset(err @ ResetError::SnapshotMissing { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "snapshot_missing", err.to_string())
            }
            ApiError::Reset(err @ ResetError::CoordinationStoreUnavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                err.to_string(),
            ),
            ApiError::Reset(err @ ResetError::SwapIo(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "swap_failed", err.to_string())
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

async fn status_handler(State(demo): State<DemoReset>) -> Result<Json<DemoStatus>, ApiError> {
    Ok(Json(demo.status().await?))
}

async fn reset_handler(
    State(demo): State<DemoReset>,
    headers: HeaderMap,
) -> Result<Json<SwapReport>, ApiError> {
    let Some(expected) = demo.settings().operator_token.as_deref() else {
        return Err(ApiError::ResetDisabled);
    };
    if !bearer_matches(&headers, expected) {
        return Err(ApiError::Unauthorized);
    }

    let operator = headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");

    Ok(Json(demo.force_reset(operator).await?))
}

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    let candidate = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();
    !expected.is_empty() && candidate == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::coordination::{ClockKey, CoordinationStore, MemoryCoordinationStore};
    use crate::settings::DemoSettings;
    use crate::swap::test_support::CountingRestorer;
    use axum::body::Body;
    use axum::http::Method;
    use http_body_util::BodyExt;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Harness {
        demo: DemoReset,
        store: Arc<MemoryCoordinationStore>,
        restorer: Arc<CountingRestorer>,
    }

    fn harness(token: Option<&str>) -> Harness {
        let store = Arc::new(MemoryCoordinationStore::new());
        let restorer = Arc::new(CountingRestorer::default());
        let settings = DemoSettings {
            demo_mode_enabled: true,
            operator_token: token.map(str::to_string),
            ..DemoSettings::default()
        };
        let demo = DemoReset::with_parts(
            settings,
            store.clone(),
            restorer.clone(),
            Arc::new(ManualClock::new(5_000)),
        );
        Harness {
            demo,
            store,
            restorer,
        }
    }

    fn request(method: Method, uri: &str, token: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn host_app(recorder: ActivityRecorder) -> Router {
        let app = Router::new().route("/items", get(|| async { "list" }).post(|| async { "created" }));
        activity_layer(app, recorder)
    }

    #[tokio::test]
    async fn post_through_layer_records_activity() {
        let h = harness(None);
        let response = host_app(h.demo.recorder().clone())
            .oneshot(request(Method::POST, "/items", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.store.get(ClockKey::LastModified).await.unwrap(), Some(5_000));
    }

    #[tokio::test]
    async fn get_through_layer_is_not_activity() {
        let h = harness(None);
        let response = host_app(h.demo.recorder().clone())
            .oneshot(request(Method::GET, "/items", Some("session")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.store.get(ClockKey::LastModified).await.unwrap(), None);
    }

    #[tokio::test]
    async fn status_endpoint_returns_json() {
        let h = harness(None);
        let response = admin_router(h.demo.clone())
            .oneshot(request(Method::GET, "/demo/status", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["now"], 5_000);
        assert_eq!(body["clocks"]["lastResetAt"], 5_000);
        assert_eq!(body["decision"]["rule"], "notDue");
    }

    #[tokio::test]
    async fn reset_refused_without_configured_token() {
        let h = harness(None);
        let response = admin_router(h.demo.clone())
            .oneshot(request(Method::POST, "/demo/reset", Some("anything")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(h.restorer.calls(), 0);
    }

    #[tokio::test]
    async fn reset_rejects_wrong_token() {
        let h = harness(Some("s3cret"));
        let router = admin_router(h.demo.clone());

        let missing = router
            .clone()
            .oneshot(request(Method::POST, "/demo/reset", None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = router
            .oneshot(request(Method::POST, "/demo/reset", Some("guess")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.restorer.calls(), 0);
    }

    #[tokio::test]
    async fn reset_with_token_swaps() {
        let h = harness(Some("s3cret"));
        let response = admin_router(h.demo.clone())
            .oneshot(request(Method::POST, "/demo/reset", Some("s3cret")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["lastResetAt"], 5_000);
        assert_eq!(h.restorer.calls(), 1);
    }

    #[tokio::test]
    async fn operator_requests_never_stamp_activity() {
        let h = harness(Some("s3cret"));
        h.store.set(ClockKey::LastModified, 4_000).await.unwrap();
        let router = admin_router(h.demo.clone());

        let rejected = router
            .clone()
            .oneshot(request(Method::POST, "/demo/reset", Some("guess")))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.store.get(ClockKey::LastModified).await.unwrap(), Some(4_000));

        let accepted = router
            .oneshot(request(Method::POST, "/demo/reset", Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);
        assert_eq!(h.store.get(ClockKey::LastModified).await.unwrap(), None);
        assert_eq!(h.store.get(ClockKey::LastReset).await.unwrap(), Some(5_000));
    }

    #[tokio::test]
    async fn status_endpoint_leaves_store_untouched() {
        let h = harness(None);
        let response = admin_router(h.demo.clone())
            .oneshot(request(Method::GET, "/demo/status", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.store.get(ClockKey::LastReset).await.unwrap(), None);
        assert_eq!(h.store.get(ClockKey::LastModified).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reset_conflicts_while_lock_is_held() {
        let h = harness(Some("s3cret"));
        assert!(h
            .store
            .try_acquire_swap_lock("other-process", 5_000, 4_700)
            .await
            .unwrap());

        let response = admin_router(h.demo.clone())
            .oneshot(request(Method::POST, "/demo/reset", Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "swap_in_progress");
    }

    #[tokio::test]
    async fn missing_snapshot_is_unavailable() {
        let h = harness(Some("s3cret"));
        h.restorer.missing.store(true, Ordering::SeqCst);

        let response = admin_router(h.demo.clone())
            .oneshot(request(Method::POST, "/demo/reset", Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "snapshot_missing");
    }

    #[test]
    fn bearer_must_match_exactly() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(bearer_matches(&headers, "s3cret"));
        assert!(!bearer_matches(&headers, "s3cre"));
        assert!(!bearer_matches(&headers, ""));

        headers.insert(header::AUTHORIZATION, "Basic s3cret".parse().unwrap());
        assert!(!bearer_matches(&headers, "s3cret"));
    }
}
