//! Direct git execution inside a throwaway workspace.

use axum::{extract::State, Extension, Json};
use tracing::info;

use crate::error::RelayError;
use crate::rest::dto::ExecRequest;
use crate::rest::dto::ExecResponse;
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::middleware::RequestId;
use crate::rest::state::ApiState;

/// Run a validated git command
#[utoipa::path(
    post,
    path = "/git-exec",
    tag = "Git",
    request_body = ExecRequest,
    security(("auth_key" = [])),
    responses(
        (status = 200, description = "Command exited with status 0", body = ExecResponse),
        (status = 400, description = "Command rejected", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 500, description = "Command failed", body = ErrorResponse),
        (status = 504, description = "Command timed out", body = ErrorResponse)
    )
)]
pub async fn git_exec(
    State(state): State<ApiState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<ExecResponse>, ApiError> {
    // Program and metacharacter checks before anything is allocated
    state
        .validator
        .check_tokens(&request.command)
        .map_err(|e| state.fail(e.into()))?;

    let result = state
        .workspaces
        .scoped(request_id.as_str(), |workspace| {
            let state = state.clone();
            let request = request.clone();
            async move {
                let command = state.validator.validate_command(
                    &request.command,
                    &workspace,
                    request.cwd.as_deref(),
                    request.timeout,
                )?;
                tokio::fs::create_dir_all(&command.cwd).await?;

                let git = state.git.for_workspace(&workspace).await?;
                let result = git.run_validated(&command).await?;
                info!(
                    subcommand = %command.subcommand,
                    exit_code = ?result.exit_code,
                    timed_out = result.timed_out,
                    "direct exec finished"
                );

                if result.timed_out {
                    return Err(RelayError::Timeout {
                        operation: result.operation,
                        timeout: state.executor.timeout(command.timeout),
                    });
                }
                if !result.success() {
                    return Err(RelayError::Execution {
                        stderr: result.stderr_str().trim().to_string(),
                        operation: result.operation,
                        exit_code: result.exit_code,
                    });
                }
                Ok(ExecResponse::from_result(&result, &state.redactor))
            }
        })
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(result))
}
