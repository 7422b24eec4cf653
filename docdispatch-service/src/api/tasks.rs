//! Task status endpoint.

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use crate::db::TaskRecord;
use crate::error::ServiceError;

use super::AppState;

/// Get a task record by ID
pub async fn get_task_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ServiceError> {
    Ok(Json(state.service.get_task(&id)?))
}
