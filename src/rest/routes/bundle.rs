//! Bundle endpoints: stream a bundle out, accept one in.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::bundle::{PushOutcome, PushRequest, UPLOAD_FILE};
use crate::error::{RelayError, ValidationError};
use crate::git::RefRange;
use crate::rest::dto::{FetchBundleRequest, PushBundleForm};
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::middleware::RequestId;
use crate::rest::state::ApiState;
use crate::workspace::Workspace;

/// Clone a repository and download it as a git bundle
#[utoipa::path(
    post,
    path = "/git/fetch-bundle",
    tag = "Bundles",
    request_body = FetchBundleRequest,
    security(("auth_key" = [])),
    responses(
        (status = 200, description = "Verified bundle", content_type = "application/octet-stream", body = Vec<u8>),
        (status = 400, description = "Invalid repository URL or ref", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 500, description = "Clone or bundle failed", body = ErrorResponse),
        (status = 504, description = "Clone or bundle timed out", body = ErrorResponse)
    )
)]
pub async fn fetch_bundle(
    State(state): State<ApiState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<FetchBundleRequest>,
) -> Result<Response, ApiError> {
    let range = RefRange::from_request(request.reference.as_deref(), request.since.as_deref())
        .map_err(|e| state.fail(e.into()))?;

    let fetched = state
        .bundles
        .fetch_bundle(request_id.as_str(), &request.repo_url, range)
        .await
        .map_err(|e| state.fail(e))?;

    let disposition = format!("attachment; filename=\"{}\"", fetched.file_name());
    let size = fetched.size();
    let stream = fetched.into_stream().await.map_err(|e| state.fail(e))?;

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Upload a bundle, push its branch and optionally open a pull request
#[utoipa::path(
    post,
    path = "/git/push-bundle",
    tag = "Bundles",
    request_body(content = PushBundleForm, content_type = "multipart/form-data"),
    security(("auth_key" = [])),
    responses(
        (status = 200, description = "Branch pushed; PR outcome reported separately", body = PushOutcome),
        (status = 400, description = "Missing field, invalid bundle or oversized upload", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 500, description = "Clone, fetch or push failed", body = ErrorResponse),
        (status = 504, description = "Operation timed out", body = ErrorResponse)
    )
)]
pub async fn push_bundle(
    State(state): State<ApiState>,
    Extension(request_id): Extension<RequestId>,
    multipart: Multipart,
) -> Result<Json<PushOutcome>, ApiError> {
    let (form, upload) = read_form(&state, request_id.as_str(), multipart).await?;

    let Some((workspace, bundle)) = upload else {
        return Err(state.fail(ValidationError::MissingField("bundle").into()));
    };
    if let Err(e) = form.validate(state.bundles.validator()) {
        workspace.release().await;
        return Err(state.fail(e.into()));
    }

    let mut outcome = state
        .bundles
        .push_bundle(workspace, &bundle, &form)
        .await
        .map_err(|e| state.fail(e))?;
    outcome.pr_error = outcome.pr_error.map(|e| state.redactor.redact(&e));
    Ok(Json(outcome))
}

/// Collect the text fields and stream the bundle field into a fresh workspace.
/// On error the partially filled workspace is removed by its guard.
async fn read_form(
    state: &ApiState,
    request_id: &str,
    mut multipart: Multipart,
) -> Result<(PushRequest, Option<(Workspace, PathBuf)>), ApiError> {
    let mut form = PushRequest::default();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "bundle" => {
                if upload.is_some() {
                    return Err(ApiError::bad_request("More than one bundle field"));
                }
                let workspace = state
                    .bundles
                    .upload_workspace(request_id)
                    .await
                    .map_err(|e| state.fail(e))?;
                let path = workspace.join(UPLOAD_FILE);
                let written = save_field(field, &path, state.config.limits.max_bundle_bytes).await;
                match written {
                    Ok(size) => {
                        debug!(size, "bundle upload stored");
                        upload = Some((workspace, path));
                    }
                    Err(e) => {
                        workspace.release().await;
                        return Err(state.fail(e));
                    }
                }
            }
            "repo_url" => form.repo_url = text(field).await?,
            "branch" => form.branch = text(field).await?,
            "create_pr" => form.create_pr = parse_flag(&text(field).await?),
            "pr_title" => form.pr_title = non_empty(text(field).await?),
            "pr_body" => form.pr_body = non_empty(text(field).await?),
            "base" => form.base = non_empty(text(field).await?),
            other => debug!(field = other, "ignoring unknown form field"),
        }
    }
    Ok((form, upload))
}

async fn text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|t| t.trim().to_string())
        .map_err(|e| ApiError::bad_request(format!("Invalid form field: {e}")))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Stream one multipart field to `path`, enforcing `limit`
async fn save_field(mut field: Field<'_>, path: &Path, limit: usize) -> Result<u64, RelayError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: usize = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ValidationError::InvalidBundle(format!("upload interrupted: {e}")))?
    {
        written += chunk.len();
        if written > limit {
            return Err(ValidationError::UploadTooLarge { limit }.into());
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    if written == 0 {
        return Err(ValidationError::InvalidBundle("empty upload".to_string()).into());
    }
    Ok(written as u64)
}
