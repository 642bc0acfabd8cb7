use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{delete, get, patch, post, put},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{runs, scenarios, sync, teams};
use super::sse_logs_endpoint;

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    let api_port = state.api_port;

    Router::new()
        .route(
            "/api/dashboard/teams/{team_id}/runs",
            get(runs::get_team_runs).post(runs::trigger_organizer_run),
        )
        .route(
            "/api/space/teams/{team_id}/runs",
            get(runs::get_participant_runs).post(runs::trigger_participant_run),
        )
        .route("/api/runs/{run_id}", get(runs::get_run))
        .route(
            "/api/runs/{run_id}/executions",
            delete(runs::cleanup_run_executions),
        )
        .route("/api/run-steps/{step_id}", get(runs::get_run_step))
        .route("/api/load-testing/sync", post(sync::sync_now))
        .route(
            "/api/scenarios",
            get(scenarios::get_scenarios).post(scenarios::create_scenario),
        )
        .route(
            "/api/scenarios/{scenario_id}/steps",
            get(scenarios::get_steps).post(scenarios::add_step),
        )
        .route(
            "/api/scenarios/{scenario_id}/steps/{step_id}",
            patch(scenarios::update_step),
        )
        .route(
            "/api/scenarios/{scenario_id}/steps/{step_id}/reorder",
            post(scenarios::reorder_step),
        )
        .route("/api/teams", get(teams::get_teams).post(teams::create_team))
        .route(
            "/api/teams/{team_id}/environment",
            put(teams::set_environment),
        )
        .route("/api/logs", get(sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}
