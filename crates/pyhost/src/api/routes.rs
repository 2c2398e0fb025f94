//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use super::ws;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);
    let max_body_size = state.max_body_bytes;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let project_routes = Router::new()
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{id}",
            get(handlers::get_project)
                .patch(handlers::update_project)
                .delete(handlers::delete_project),
        )
        // Process control
        .route("/projects/{id}/start", post(handlers::start_project))
        .route("/projects/{id}/stop", post(handlers::stop_project))
        .route("/projects/{id}/sync-files", post(handlers::sync_files))
        .route(
            "/projects/{id}/execute-command",
            post(handlers::execute_command),
        )
        .route(
            "/projects/{id}/install-package",
            post(handlers::install_package),
        )
        .route(
            "/projects/{id}/uninstall-package",
            post(handlers::uninstall_package),
        )
        // Stored tree
        .route(
            "/projects/{id}/files",
            get(handlers::list_files).post(handlers::create_file),
        )
        .route("/projects/{id}/folders", post(handlers::create_folder))
        .route(
            "/projects/{id}/files/{file_id}",
            patch(handlers::update_file).delete(handlers::delete_file),
        )
        .route("/projects/{id}/upload-zip", post(handlers::upload_zip))
        .route(
            "/projects/{id}/env",
            get(handlers::get_env).post(handlers::set_env),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", project_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}

/// Build the CORS layer from the configured origins.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN];

    if state.allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(headers)
}
