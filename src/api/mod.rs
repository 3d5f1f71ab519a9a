mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::orchestrator::FeatureLifecycleOrchestrator;
use crate::progress::ProgressHost;
use crate::registry::ComponentRegistry;

pub use handlers::{ComponentDetail, ToggleResponse};

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    pub registry: ComponentRegistry,
    pub orchestrator: FeatureLifecycleOrchestrator,
    pub progress: ProgressHost,
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Namespaces
        .route("/namespaces", get(handlers::list_namespaces))
        .route("/namespaces/{ns}/components", post(handlers::create_component))
        // Components
        .route("/namespaces/{ns}/components/{name}", get(handlers::get_component))
        .route("/namespaces/{ns}/components/{name}", delete(handlers::delete_component))
        .route(
            "/namespaces/{ns}/components/{name}/features/{feature}/toggle",
            post(handlers::toggle_feature),
        )
        // Progress
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/{id}", delete(handlers::cancel_task))
        // Presentation
        .route("/tree", get(handlers::tree))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
