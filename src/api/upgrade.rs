// Upgrade workflow routes

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
use crate::controller::UpgradeController;
use crate::store::StatusRecord;
use crate::workflows::UpgradeState;

type Controller = State<Arc<UpgradeController>>;
type Accepted = (StatusCode, Json<StatusRecord>);

pub(super) fn routes(controller: Arc<UpgradeController>) -> Router {
    Router::new()
        .route("/api/upgrade/state", get(state))
        .route("/api/upgrade/app/config/values", get(config_values).patch(patch_config_values))
        .route("/api/upgrade/app/config/status", get(config_status))
        .route("/api/upgrade/airgap/process", post(process_airgap))
        .route("/api/upgrade/airgap/status", get(airgap_status))
        .route("/api/upgrade/infra/upgrade", post(upgrade_infra))
        .route("/api/upgrade/infra/status", get(infra_status))
        .route("/api/upgrade/app-preflights/run", post(run_app_preflights))
        .route("/api/upgrade/app-preflights/status", get(app_preflights_status))
        .route("/api/upgrade/app/upgrade", post(upgrade_app))
        .route("/api/upgrade/app/status", get(app_status))
        .with_state(controller)
}

async fn state(State(controller): Controller) -> Json<StateResponse<UpgradeState>> {
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

async fn process_airgap(State(controller): Controller) -> Result<Accepted, ApiError> {
    let status = controller.process_airgap()?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn airgap_status(State(controller): Controller) -> Json<AirgapStatusResponse> {
    Json(AirgapStatusResponse::from(controller.airgap().as_ref()))
}

async fn upgrade_infra(State(controller): Controller) -> Result<Accepted, ApiError> {
    let status = controller.upgrade_infra()?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn infra_status(State(controller): Controller) -> Json<InfraStatusResponse> {
    Json(InfraStatusResponse::from(controller.infra().as_ref()))
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

async fn upgrade_app(
    State(controller): Controller,
    OptionalJson(body): OptionalJson<IgnorePreflightsBody>,
) -> Result<Accepted, ApiError> {
    let status = controller.upgrade_app(body.ignore_preflights)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn app_status(State(controller): Controller) -> Json<AppStatusResponse> {
    Json(AppStatusResponse::from(controller.app().as_ref()))
}
