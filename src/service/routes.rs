//! HTTP routes for the run service.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{FromRequest, Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use secrecy::SecretString;
use serde::Serialize;
use uuid::Uuid;

use super::auth::{AuthState, require_bearer};
use super::{RunService, UserInput};
use crate::error::{Error, RequestError, RunError};

/// Build the router. `/health` stays open even when auth is enabled.
pub fn router(service: Arc<RunService>, auth_secret: Option<SecretString>) -> Router {
    let auth = AuthState::new(auth_secret);

    let protected = Router::new()
        .route("/info", get(info))
        .route("/start", post(start_default))
        .route("/{agent_id}/start", post(start_agent))
        .route("/agent/{run_id}/status", get(run_status))
        .route("/stream", post(stream_default))
        .route("/{agent_id}/stream", post(stream_agent))
        .route("/invoke", post(invoke_default))
        .route("/{agent_id}/invoke", post(invoke_agent))
        .route("/logs", get(list_logs))
        .route("/logs/{filename}", get(read_log))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer))
        .with_state(service);

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(tower::ServiceBuilder::new().layer(tower_http::cors::CorsLayer::permissive()))
}

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Service error or request rejection rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Service(Error),
    /// Body was not valid JSON for the endpoint.
    Rejected(JsonRejection),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Service(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Rejected(rejection) => (rejection.status(), rejection.body_text()),
            Self::Service(err) => service_error(err),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

fn service_error(err: Error) -> (StatusCode, String) {
    match &err {
        Error::Run(e @ RunError::NotFound { .. }) => (StatusCode::NOT_FOUND, e.to_string()),
        Error::Request(
            e @ (RequestError::UnknownAgent { .. }
            | RequestError::UnknownRun { .. }
            | RequestError::UnknownLogFile { .. }),
        ) => (StatusCode::NOT_FOUND, e.to_string()),
        Error::Request(e @ RequestError::MalformedInput(_)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        Error::Request(e @ RequestError::InvalidLogFile(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
        other => {
            tracing::error!(error = %other, "Request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unexpected error".to_string(),
            )
        }
    }
}

/// `Json` extractor whose rejection uses the same error body as the service.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct AppJson<T>(T);

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info(State(service): State<Arc<RunService>>) -> impl IntoResponse {
    Json(service.info())
}

async fn start_default(
    State(service): State<Arc<RunService>>,
    AppJson(input): AppJson<UserInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.start_run(None, &input).await?))
}

async fn start_agent(
    State(service): State<Arc<RunService>>,
    Path(agent_id): Path<String>,
    AppJson(input): AppJson<UserInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.start_run(Some(&agent_id), &input).await?))
}

async fn run_status(
    State(service): State<Arc<RunService>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // A malformed id can't name a run, so it is reported like a missing one.
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|_| Error::from(RequestError::UnknownRun { id: run_id.clone() }))?;
    Ok(Json(service.run_status(run_id).await?))
}

fn sse_response(
    service: &RunService,
    agent_id: Option<&str>,
    input: &UserInput,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ApiError> {
    let frames = service.stream_run(agent_id, input)?;
    let events = frames.map(|frame| Ok::<_, Infallible>(Event::default().data(frame.payload())));
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn stream_default(
    State(service): State<Arc<RunService>>,
    AppJson(input): AppJson<UserInput>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    sse_response(&service, None, &input)
}

async fn stream_agent(
    State(service): State<Arc<RunService>>,
    Path(agent_id): Path<String>,
    AppJson(input): AppJson<UserInput>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    sse_response(&service, Some(&agent_id), &input)
}

async fn invoke_default(
    State(service): State<Arc<RunService>>,
    AppJson(input): AppJson<UserInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.invoke_run(None, &input).await?))
}

async fn invoke_agent(
    State(service): State<Arc<RunService>>,
    Path(agent_id): Path<String>,
    AppJson(input): AppJson<UserInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.invoke_run(Some(&agent_id), &input).await?))
}

async fn list_logs(State(service): State<Arc<RunService>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.list_logs().await?))
}

async fn read_log(
    State(service): State<Arc<RunService>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.read_log(&filename).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentCatalog;
    use crate::config::ServiceConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(secret: Option<&str>) -> Router {
        app_with(secret, &ServiceConfig::default())
    }

    fn app_with(secret: Option<&str>, config: &ServiceConfig) -> Router {
        let service = Arc::new(RunService::new(AgentCatalog::with_builtin("echo-agent"), config));
        router(service, secret.map(SecretString::from))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let response = app(Some("secret"))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn info_lists_agents() {
        let response = app(None)
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["default_agent"], "echo-agent");
        assert_eq!(body["agents"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn protected_route_needs_token() {
        let response = app(Some("secret"))
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(Some("secret"))
            .oneshot(
                Request::get("/info")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_returns_started_run() {
        let response = app(None)
            .oneshot(post_json(
                "/start",
                json!({"message": "hello", "thread_id": "t-9"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "started");
        assert_eq!(body["thread_id"], "t-9");
        assert_eq!(body["agent_kind"], "streaming");
        assert!(Uuid::parse_str(body["run_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn unknown_agent_is_404() {
        let response = app(None)
            .oneshot(post_json("/nobody/start", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_input_is_422() {
        let response = app(None)
            .oneshot(post_json("/start", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_json(response).await["detail"].is_string());
    }

    #[tokio::test]
    async fn invalid_json_body_has_detail() {
        let request = Request::post("/start")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app(None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["detail"].is_string());

        let request = Request::post("/invoke").body(Body::from("{}")).unwrap();
        let response = app(None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body_json(response).await["detail"].is_string());
    }

    #[tokio::test]
    async fn unknown_run_is_404() {
        for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let response = app(None)
                .oneshot(
                    Request::get(format!("/agent/{id}/status"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn stream_body_is_sse_frames() {
        let response = app(None)
            .oneshot(post_json(
                "/stream",
                json!({"state": {"messages": "a b", "delay_ms": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let frames: Vec<&str> = text
            .split("\n\n")
            .filter(|f| f.starts_with("data: "))
            .collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], "data: [DONE]");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invoke_failure_is_500() {
        let response = app(None)
            .oneshot(post_json(
                "/batch-agent/invoke",
                json!({"state": {"steps": 1, "delay_ms": 1, "fail_at": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"detail": "Unexpected error"}));
    }

    #[tokio::test]
    async fn logs_are_listed_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agent-jobs.2026-10-16.txt"), "started\n").unwrap();
        let config = ServiceConfig {
            log_dir: Some(dir.path().display().to_string()),
            ..ServiceConfig::default()
        };

        let response = app_with(None, &config).oneshot(get_request("/logs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"log_files": ["agent-jobs.2026-10-16.txt"]})
        );

        let response = app_with(None, &config)
            .oneshot(get_request("/logs/agent-jobs.2026-10-16.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"filename": "agent-jobs.2026-10-16.txt", "content": "started\n"})
        );
    }

    #[tokio::test]
    async fn bad_log_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            log_dir: Some(dir.path().display().to_string()),
            ..ServiceConfig::default()
        };

        let response = app_with(None, &config).oneshot(get_request("/logs/missing.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        for uri in ["/logs/..%2Fsecret.txt", "/logs/..", "/logs/server.log"] {
            let response = app_with(None, &config).oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert!(body_json(response).await["detail"].is_string());
        }
    }

    #[tokio::test]
    async fn logs_need_token() {
        let response = app(Some("secret")).oneshot(get_request("/logs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
