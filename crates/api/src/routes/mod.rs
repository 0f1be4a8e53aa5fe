pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
