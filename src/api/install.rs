// Install workflow routes

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::{
    AirgapStatusResponse, ApiError, AppStatusResponse, ConfigValuesBody, IgnorePreflightsBody,
    InfraStatusResponse, OptionalJson, PreflightStatusResponse, StateResponse,
};
use crate::controller::InstallController;
use crate::store::StatusRecord;
use crate::types::InstallationConfig;
use crate::workflows::InstallState;

type Controller = State<Arc<InstallController>>;
type Accepted = (StatusCode, Json<StatusRecord>);

pub(super) fn routes(controller: Arc<InstallController>) -> Router {
    Router::new()
        .route("/api/install/state", get(state))
        .route("/api/install/app/config/values", get(config_values).patch(patch_config_values))
        .route("/api/install/app/config/status", get(config_status))
        .route("/api/install/installation/config", get(installation_config))
        .route("/api/install/installation/configure", post(configure_installation))
        .route("/api/install/installation/status", get(installation_status))
        .route("/api/install/host-preflights/run", post(run_host_preflights))
        .route("/api/install/host-preflights/status", get(host_preflights_status))
        .route("/api/install/infra/setup", post(setup_infra))
        .route("/api/install/infra/status", get(infra_status))
        .route("/api/install/airgap/process", post(process_airgap))
        .route("/api/install/airgap/status", get(airgap_status))
        .route("/api/install/app-preflights/run", post(run_app_preflights))
        .route("/api/install/app-preflights/status", get(app_preflights_status))
        .route("/api/install/app/install", post(install_app))
        .route("/api/install/app/status", get(app_status))
        .with_state(controller)
}

async fn state(State(controller): Controller) -> Json<StateResponse<InstallState>> {
    Json(StateResponse {
        state: controller.current_state(),
        busy: controller.is_busy(),
        last_transition: controller.last_transition(),
    })
}

async fn config_values(State(controller): Controller) -> Json<ConfigValuesBody> {
    Json(ConfigValuesBody {
        values: controller.app_config_values(),
    })
}

async fn patch_config_values(
    State(controller): Controller,
    Json(body): Json<ConfigValuesBody>,
) -> Result<Json<ConfigValuesBody>, ApiError> {
    let values = controller.patch_app_config_values(body.values).await?;
    Ok(Json(ConfigValuesBody { values }))
}

async fn config_status(State(controller): Controller) -> Json<StatusRecord> {
    Json(controller.app_config_status())
}

async fn installation_config(State(controller): Controller) -> Json<InstallationConfig> {
    Json(controller.installation_config())
}

async fn configure_installation(
    State(controller): Controller,
    Json(body): Json<InstallationConfig>,
) -> Result<Json<InstallationConfig>, ApiError> {
    Ok(Json(controller.configure_installation(body).await?))
}

async fn installation_status(State(controller): Controller) -> Json<StatusRecord> {
    Json(controller.installation_status())
}

async fn run_host_preflights(State(controller): Controller) -> Result<Accepted, ApiError> {
    let status = controller.run_host_preflights()?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn host_preflights_status(State(controller): Controller) -> Json<PreflightStatusResponse> {
    Json(PreflightStatusResponse::from_store(
        &controller.host_preflights(),
        controller.options().allow_ignore_host_preflights,
    ))
}

async fn setup_infra(
    State(controller): Controller,
    OptionalJson(body): OptionalJson<IgnorePreflightsBody>,
) -> Result<Accepted, ApiError> {
    let status = controller.setup_infra(body.ignore_preflights)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn infra_status(State(controller): Controller) -> Json<InfraStatusResponse> {
    Json(InfraStatusResponse::from(controller.infra().as_ref()))
}

async fn process_airgap(State(controller): Controller) -> Result<Accepted, ApiError> {
    let status = controller.process_airgap()?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn airgap_status(State(controller): Controller) -> Json<AirgapStatusResponse> {
    Json(AirgapStatusResponse::from(controller.airgap().as_ref()))
}

async fn run_app_preflights(State(controller): Controller) -> Result<Accepted, ApiError> {
    let status = controller.run_app_preflights()?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn app_preflights_status(State(controller): Controller) -> Json<PreflightStatusResponse> {
    Json(PreflightStatusResponse::from_store(
        &controller.app_preflights(),
        controller.options().allow_ignore_app_preflights,
    ))
}

async fn install_app(
    State(controller): Controller,
    OptionalJson(body): OptionalJson<IgnorePreflightsBody>,
) -> Result<Accepted, ApiError> {
    let status = controller.install_app(body.ignore_preflights)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn app_status(State(controller): Controller) -> Json<AppStatusResponse> {
    Json(AppStatusResponse::from(controller.app().as_ref()))
}
