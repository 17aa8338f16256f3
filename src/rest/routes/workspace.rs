//! Workspace introspection.

use axum::{extract::State, Json};

use crate::rest::dto::WorkspaceListResponse;
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::state::ApiState;

/// List active and orphaned workspaces
#[utoipa::path(
    get,
    path = "/workspace/list",
    tag = "Workspaces",
    security(("auth_key" = [])),
    responses(
        (status = 200, description = "Workspaces under the root", body = WorkspaceListResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse)
    )
)]
pub async fn list(State(state): State<ApiState>) -> Result<Json<WorkspaceListResponse>, ApiError> {
    let manager = state.workspaces.clone();
    let workspaces = tokio::task::spawn_blocking(move || manager.list())
        .await
        .map_err(|e| ApiError::internal(format!("workspace listing panicked: {e}")))?
        .map_err(|e| state.fail(e))?;

    Ok(Json(WorkspaceListResponse {
        root: state.workspaces.root().display().to_string(),
        count: workspaces.len(),
        workspaces,
    }))
}
