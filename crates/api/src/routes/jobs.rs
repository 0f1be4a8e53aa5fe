//! Job progress routes.
//!
//! ```text
//! GET /{job_id}/progress?limit=N   recent events, oldest first
//! GET /{job_id}/ws                 WebSocket: history replay, then live events
//! ```

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use renamer_events::bus::DEFAULT_HISTORY_LIMIT;
use renamer_events::ProgressEvent;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws;

/// Upper bound for `limit` on a history poll.
pub const MAX_HISTORY_LIMIT: usize = 500;

const MAX_JOB_ID_LEN: usize = 128;

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub job_id: String,
    pub count: usize,
    pub updates: Vec<ProgressEvent>,
}

/// Job ids come from the submission endpoint: short ASCII tokens.
pub fn validate_job_id(job_id: &str) -> AppResult<()> {
    let valid = !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid job id: {job_id:?}")))
    }
}

/// GET /{job_id}/progress
async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> AppResult<Json<ProgressResponse>> {
    validate_job_id(&job_id)?;

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_HISTORY_LIMIT}"
        )));
    }

    let updates = state.bus.history(&job_id, limit).await;
    Ok(Json(ProgressResponse {
        job_id,
        count: updates.len(),
        updates,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{job_id}/progress", get(progress))
        .route("/{job_id}/ws", get(ws::ws_handler))
}
