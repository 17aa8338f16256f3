//! OpenAPI document builder using utoipa.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::bundle::PushOutcome;
use crate::exec::TimeoutClass;
use crate::rest::dto::{
    ExecRequest, ExecResponse, FetchBundleRequest, HealthResponse, PushBundleForm,
    WorkspaceListResponse,
};
use crate::rest::error::ErrorResponse;
use crate::workspace::WorkspaceInfo;

/// Registers the shared-secret header as the `auth_key` scheme
struct AuthKeyScheme;

impl Modify for AuthKeyScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "auth_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Auth-Key"))),
            );
        }
    }
}

/// OpenAPI documentation for the git relay
#[derive(OpenApi)]
#[openapi(
    info(
        title = "git-relay API",
        description = "Authenticated relay for sandboxed git commands and bundle transfer.",
        license(name = "MIT")
    ),
    paths(
        crate::rest::routes::health::health,
        crate::rest::routes::exec::git_exec,
        crate::rest::routes::bundle::fetch_bundle,
        crate::rest::routes::bundle::push_bundle,
        crate::rest::routes::workspace::list,
    ),
    components(
        schemas(
            HealthResponse,
            ExecRequest,
            ExecResponse,
            TimeoutClass,
            FetchBundleRequest,
            PushBundleForm,
            PushOutcome,
            WorkspaceInfo,
            WorkspaceListResponse,
            ErrorResponse,
        )
    ),
    modifiers(&AuthKeyScheme),
    tags(
        (name = "Health", description = "Liveness endpoint"),
        (name = "Git", description = "Direct git execution"),
        (name = "Bundles", description = "Bundle transfer workflows"),
        (name = "Workspaces", description = "Workspace introspection"),
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI document as a JSON string
    pub fn json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}
