use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::models::*;
use crate::orchestrator::{ToggleError, ToggleOutcome, TransitionPhase};
use crate::process::ProcessError;
use crate::progress::{ActiveTask, ProgressError};
use crate::registry::RegistryError;
use crate::state::FeatureState;
use crate::tree_render::{component_status, render_tree};

type ApiError = (StatusCode, String);

// ============================================================
// Responses
// ============================================================

/// A component with its live features and the phase of each supported feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDetail {
    #[serde(flatten)]
    pub view: ComponentView,
    pub phases: BTreeMap<ComponentFeature, TransitionPhase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub component: ComponentKey,
    pub feature: ComponentFeature,
    #[serde(flatten)]
    pub outcome: ToggleOutcome,
    pub live_features: LiveFeatures,
}

// ============================================================
// Error Handling
// ============================================================

fn toggle_error(e: ToggleError) -> ApiError {
    let status = match &e {
        ToggleError::Unsupported { .. } => StatusCode::BAD_REQUEST,
        ToggleError::TransitionInFlight { .. }
        | ToggleError::StillActive { .. }
        | ToggleError::Cancelled { .. } => StatusCode::CONFLICT,
        ToggleError::Process(ProcessError::ToolInvocation { .. }) => StatusCode::BAD_GATEWAY,
        ToggleError::Process(ProcessError::StopTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        ToggleError::Process(ProcessError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.user_message())
}

fn progress_error(e: ProgressError) -> ApiError {
    match e {
        ProgressError::Cancelled(_) => {
            tracing::info!("{}", e);
            (StatusCode::CONFLICT, format!("Error: {}", e))
        }
        ProgressError::Crashed { .. } => {
            tracing::error!("Internal error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

fn registry_error(e: RegistryError) -> ApiError {
    tracing::warn!("Validation error: {}", e);
    let status = match e {
        RegistryError::AlreadyExists { .. } => StatusCode::CONFLICT,
        RegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
    };
    (status, format!("Error: {}", e))
}

fn component_not_found() -> ApiError {
    (StatusCode::NOT_FOUND, "Component not found".to_string())
}

fn component_view(state: &FeatureState, component: Component) -> ComponentView {
    let live_features = state.features(&component.key);
    ComponentView {
        status: component_status(&live_features),
        live_features,
        component,
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Namespaces
// ============================================================

fn namespace_views(app: &AppState) -> Vec<NamespaceView> {
    let state = app.orchestrator.state();
    app.registry
        .list_namespaces()
        .into_iter()
        .map(|ns| NamespaceView {
            name: ns.name,
            components: ns
                .components
                .into_iter()
                .map(|c| component_view(state, c))
                .collect(),
        })
        .collect()
}

pub async fn list_namespaces(State(app): State<AppState>) -> Json<Vec<NamespaceView>> {
    Json(namespace_views(&app))
}

pub async fn tree(State(app): State<AppState>) -> String {
    render_tree(&namespace_views(&app))
}

// ============================================================
// Components
// ============================================================

pub async fn create_component(
    State(app): State<AppState>,
    Path(ns): Path<String>,
    Json(input): Json<CreateComponentInput>,
) -> Result<(StatusCode, Json<Component>), ApiError> {
    app.registry
        .create_component(&ns, input)
        .map(|c| (StatusCode::CREATED, Json(c)))
        .map_err(registry_error)
}

pub async fn get_component(
    State(app): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Json<ComponentDetail>, ApiError> {
    let component = app
        .registry
        .get_component(&ns, &name)
        .ok_or_else(component_not_found)?;

    let phases = ComponentFeature::ALL
        .into_iter()
        .filter(|f| component.info.supports(*f))
        .map(|f| (f, app.orchestrator.phase(&component.key, f)))
        .collect();

    Ok(Json(ComponentDetail {
        view: component_view(app.orchestrator.state(), component),
        phases,
    }))
}

pub async fn delete_component(
    State(app): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let component = app
        .registry
        .get_component(&ns, &name)
        .ok_or_else(component_not_found)?;
    app.orchestrator
        .forget(&component.key)
        .map_err(toggle_error)?;
    app.registry.delete_component(&ns, &name);
    tracing::info!("Deleted component {}", component.key);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_feature(
    State(app): State<AppState>,
    Path((ns, name, feature)): Path<(String, String, String)>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let feature = ComponentFeature::from_str(&feature).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("Error: unknown feature '{}'", feature),
        )
    })?;
    let component = app
        .registry
        .get_component(&ns, &name)
        .ok_or_else(component_not_found)?;

    let orchestrator = app.orchestrator.clone();
    let target = component.clone();
    let handle = app.progress.run(
        format!("Toggling {} on {}", feature.label(), component.key),
        move |token| async move {
            orchestrator
                .toggle_cancellable(&target, feature, &token)
                .await
        },
    );

    let outcome = handle
        .wait()
        .await
        .map_err(progress_error)?
        .map_err(toggle_error)?;

    Ok(Json(ToggleResponse {
        live_features: app.orchestrator.state().features(&component.key),
        component: component.key,
        feature,
        outcome,
    }))
}

// ============================================================
// Tasks
// ============================================================

pub async fn list_tasks(State(app): State<AppState>) -> Json<Vec<ActiveTask>> {
    Json(app.progress.active())
}

pub async fn cancel_task(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if app.progress.cancel(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Task not found".to_string()))
    }
}
