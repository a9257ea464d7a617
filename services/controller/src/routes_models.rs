use std::collections::BTreeMap;
use std::future::Future;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use supervisor::{ModelStatus, SupervisorError};
use tracing::error;

use crate::error::ControllerError;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct ModelsResponse {
    pub models: BTreeMap<String, ModelStatus>,
    pub active: Option<String>,
}

#[derive(Serialize)]
pub struct ActiveResp {
    pub active: Option<String>,
}

#[derive(Serialize)]
pub struct ActionResp {
    pub status: &'static str,
    pub message: String,
}

pub async fn get_models(State(st): State<SharedState>) -> Json<ModelsResponse> {
    let models = st.registry.list().await;
    let active = st.registry.active_model().await;
    Json(ModelsResponse { models, active })
}

pub async fn get_active(State(st): State<SharedState>) -> Json<ActiveResp> {
    Json(ActiveResp {
        active: st.registry.active_model().await,
    })
}

/// Load and unload run on their own task so a disconnecting client cannot
/// cut a start or stop short; the handler only waits for the outcome.
async fn run_lifecycle<F, Fut>(st: &SharedState, op: F) -> Result<bool, SupervisorError>
where
    F: FnOnce(SharedState) -> Fut,
    Fut: Future<Output = Result<bool, SupervisorError>> + Send + 'static,
{
    match tokio::spawn(op(st.clone())).await {
        Ok(res) => res,
        Err(e) => {
            error!("lifecycle task failed: {e}");
            Ok(false)
        }
    }
}

pub async fn post_load_model(
    State(st): State<SharedState>,
    Path(model_id): Path<String>,
) -> Result<Json<ActionResp>, ControllerError> {
    let id = model_id.clone();
    let loaded = run_lifecycle(&st, |st| async move { st.registry.load_model(&id).await }).await?;
    if !loaded {
        return Err(SupervisorError::StartupFailure(model_id).into());
    }
    Ok(Json(ActionResp {
        status: "success",
        message: format!("Model {model_id} loaded"),
    }))
}

pub async fn post_unload_model(
    State(st): State<SharedState>,
    Path(model_id): Path<String>,
) -> Result<Json<ActionResp>, ControllerError> {
    let id = model_id.clone();
    let unloaded =
        run_lifecycle(&st, |st| async move { st.registry.unload_model(&id).await }).await?;
    if !unloaded {
        return Err(SupervisorError::ShutdownFailure(model_id).into());
    }
    Ok(Json(ActionResp {
        status: "success",
        message: format!("Model {model_id} unloaded"),
    }))
}
