//! HTTP API
//!
//! Clients fire an action and then poll the matching status endpoint until
//! it reports a terminal state. Action endpoints answer `202 Accepted` once
//! the workflow has entered the action's running state; rejected actions
//! answer with `{"error": "..."}`.

mod error;
mod install;
mod upgrade;

pub use error::ApiError;

use anyhow::Context;
use axum::{
    async_trait,
    body::{to_bytes, Body},
    extract::{FromRequest, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::controller::{InstallController, UpgradeController};
use crate::observability::operation_metrics;
use crate::statemachine::TransitionRecord;
use crate::store::{AirgapStore, AppStore, InfraStore, PreflightStore, StatusRecord, StatusTracking};
use crate::telemetry::generate_correlation_id;
use crate::types::{AppRelease, ComponentStatus, ConfigValues, PreflightOutput};
use crate::workflows::Mode;

/// The workflow served by the API
#[derive(Clone)]
pub enum Workflow {
    Install(Arc<InstallController>),
    Upgrade(Arc<UpgradeController>),
}

impl Workflow {
    pub fn mode(&self) -> Mode {
        match self {
            Workflow::Install(_) => Mode::Install,
            Workflow::Upgrade(_) => Mode::Upgrade,
        }
    }

    pub fn shutdown(&self) {
        match self {
            Workflow::Install(controller) => controller.shutdown(),
            Workflow::Upgrade(controller) => controller.shutdown(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse<S> {
    pub state: S,
    pub busy: bool,
    pub last_transition: Option<TransitionRecord<S>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigValuesBody {
    pub values: ConfigValues,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightStatusResponse {
    pub titles: Vec<String>,
    pub output: Option<PreflightOutput>,
    pub status: StatusRecord,
    pub allow_ignore: bool,
}

impl PreflightStatusResponse {
    fn from_store(store: &PreflightStore, allow_ignore: bool) -> Self {
        Self {
            titles: store.titles(),
            output: store.output(),
            status: store.status(),
            allow_ignore,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfraStatusResponse {
    pub status: StatusRecord,
    pub components: Vec<ComponentStatus>,
    pub logs: String,
}

impl From<&InfraStore> for InfraStatusResponse {
    fn from(store: &InfraStore) -> Self {
        Self {
            status: store.status(),
            components: store.components(),
            logs: store.logs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AirgapStatusResponse {
    pub status: StatusRecord,
    pub logs: String,
}

impl From<&AirgapStore> for AirgapStatusResponse {
    fn from(store: &AirgapStore) -> Self {
        Self {
            status: store.status(),
            logs: store.logs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppStatusResponse {
    pub status: StatusRecord,
    pub release: Option<AppRelease>,
    pub logs: String,
}

impl From<&AppStore> for AppStatusResponse {
    fn from(store: &AppStore) -> Self {
        Self {
            status: store.status(),
            release: store.release(),
            logs: store.logs(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnorePreflightsBody {
    #[serde(default, alias = "ignoreHostPreflights", alias = "ignoreAppPreflights")]
    pub ignore_preflights: bool,
}

const MAX_BODY_BYTES: usize = 64 * 1024;

/// A JSON body the client may leave out.
///
/// An empty body yields `T::default()`. Anything else goes through the `Json`
/// extractor, so a malformed body or a missing content type is rejected.
#[derive(Debug)]
pub struct OptionalJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for OptionalJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = Response;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = request.into_parts();
        let bytes = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|err| (StatusCode::PAYLOAD_TOO_LARGE, err.to_string()).into_response())?;
        if bytes.is_empty() {
            return Ok(Self(T::default()));
        }

        let request = Request::from_parts(parts, Body::from(bytes));
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(Self(value))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: Mode,
}

/// Build the router for `workflow`.
pub fn router(workflow: Workflow) -> Router {
    let mode = workflow.mode();
    let routes = match workflow {
        Workflow::Install(controller) => install::routes(controller),
        Workflow::Upgrade(controller) => upgrade::routes(controller),
    };

    Router::new()
        .route("/health", get(move || async move { Json(HealthResponse { status: "ok", mode }) }))
        .route("/metrics", get(|| async { Json(operation_metrics().get_stats()) }))
        .merge(routes)
        .layer(middleware::from_fn(trace_request))
}

/// Give every request its own span and log how it ended.
async fn trace_request(request: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        correlation_id = %generate_correlation_id(),
    );
    async move {
        let response = next.run(request).await;
        tracing::debug!(status = %response.status(), "Request completed");
        response
    }
    .instrument(span)
    .await
}

/// Serve `app` on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server to {addr}"))?;
    info!(address = %listener.local_addr()?, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{AppConfigItem, AppConfigSchema, ControllerOptions, ItemKind};
    use crate::steps::{CommandSteps, Steps};
    use crate::config::StepsConfig;
    use axum::http::{Method, Request as HttpRequest};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn install_router(options: ControllerOptions) -> Router {
        let schema = AppConfigSchema::new(vec![AppConfigItem {
            name: "hostname".to_string(),
            kind: ItemKind::Text,
            required: true,
            default: None,
        }]);
        let steps = Steps::uniform(Arc::new(CommandSteps::new(StepsConfig::default())));
        let controller = InstallController::new(options, schema, steps, CancellationToken::new());
        router(Workflow::Install(Arc::new(controller)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = HttpRequest::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = install_router(ControllerOptions::default());
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "mode": "install"}));

        let (status, body) = send(&app, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["started"].is_u64());
    }

    #[tokio::test]
    async fn test_patch_config_and_read_state() {
        let app = install_router(ControllerOptions::default());

        let (status, body) = send(
            &app,
            Method::PATCH,
            "/api/install/app/config/values",
            Some(json!({"values": {"hostname": "shop.local"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["values"]["hostname"], json!("shop.local"));

        let (_, body) = send(&app, Method::GET, "/api/install/state", None).await;
        assert_eq!(body["state"], json!("ApplicationConfigured"));
        assert_eq!(body["busy"], json!(false));
        assert_eq!(body["lastTransition"]["from"], json!("ApplicationConfiguring"));
        assert_eq!(body["lastTransition"]["to"], json!("ApplicationConfigured"));

        let (_, body) = send(&app, Method::GET, "/api/install/app/config/status", None).await;
        assert_eq!(body["state"], json!("Succeeded"));
        assert!(body["lastUpdated"].is_string());
    }

    #[tokio::test]
    async fn test_validation_error_is_bad_request() {
        let app = install_router(ControllerOptions::default());
        let (status, body) = send(
            &app,
            Method::PATCH,
            "/api/install/app/config/values",
            Some(json!({"values": {"hostname": 42, "colour": "blue"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("validation failed"));
        assert_eq!(body["fields"].as_array().unwrap().len(), 2);

        let (_, body) = send(&app, Method::GET, "/api/install/state", None).await;
        assert_eq!(body["state"], json!("ApplicationConfigurationFailed"));
    }

    #[tokio::test]
    async fn test_illegal_action_is_conflict() {
        let app = install_router(ControllerOptions::default());
        let (status, body) = send(&app, Method::POST, "/api/install/infra/setup", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("InfrastructureInstalling"));

        let (_, body) = send(&app, Method::GET, "/api/install/state", None).await;
        assert_eq!(body["state"], json!("New"));
    }

    #[tokio::test]
    async fn test_malformed_bypass_body_is_rejected() {
        let app = install_router(ControllerOptions::default());

        let malformed = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/install/infra/setup")
            .header("content-type", "application/json")
            .body(Body::from("{\"ignoreHostPreflights\": tru"))
            .unwrap();
        let response = app.clone().oneshot(malformed).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let untyped = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/install/infra/setup")
            .body(Body::from("{\"ignoreHostPreflights\": true}"))
            .unwrap();
        let response = app.clone().oneshot(untyped).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        // neither reached the workflow
        let (_, body) = send(&app, Method::GET, "/api/install/state", None).await;
        assert_eq!(body["state"], json!("New"));
        assert!(body["lastTransition"].is_null());
    }

    #[tokio::test]
    async fn test_unsupported_action_is_not_found() {
        let app = install_router(ControllerOptions {
            target: crate::workflows::Target::Kubernetes,
            ..ControllerOptions::default()
        });
        let (status, body) = send(&app, Method::POST, "/api/install/host-preflights/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not supported"));
    }
}
