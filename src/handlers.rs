use axum::{
    Json,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    AppState,
    auth::SessionPrincipal,
    config::UnauthorizedPolicy,
    error::Error,
    router::{Dispatch, OutputFormat, PrinterKind},
};

/// DispatchResponse
///
/// The wire form of a resolved dispatch. Renderers are outside this service,
/// so the descriptor itself is the response body.
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub printer: PrinterKind,
    pub format: OutputFormat,
    pub service: String,
    pub action: String,
    pub action_method: String,
    pub action_params: Vec<String>,
    pub page_id: Option<i64>,
    pub request_method: String,
}

impl From<Dispatch> for DispatchResponse {
    fn from(dispatch: Dispatch) -> Self {
        Self {
            service: dispatch.service(),
            printer: dispatch.printer,
            format: dispatch.format,
            action: dispatch.action,
            action_method: dispatch.action_method,
            action_params: dispatch.action_params,
            page_id: dispatch.page_id,
            request_method: dispatch.request_method,
        }
    }
}

/// dispatch
///
/// Fallback handler: every request not claimed by a fixed route is resolved by
/// the request router with the caller's principal.
///
/// * 200 with the dispatch descriptor on success
/// * 404 for unknown services, actions, pages and unsupported extensions
/// * authorization failures follow the configured policy: a redirect to the
///   failing requirement's login entry point, or a bare 401
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    principal: SessionPrincipal,
) -> Response {
    match state.router.route(method.as_str(), uri.path(), &principal).await {
        Ok(dispatch) => Json(DispatchResponse::from(dispatch)).into_response(),
        Err(Error::Unauthorized { login })
            if state.config.unauthorized_policy == UnauthorizedPolicy::Reject =>
        {
            tracing::debug!(path = %uri.path(), login = %login, "rejecting unauthorized request");
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(e) => {
            if e.code() >= 500 {
                tracing::error!(path = %uri.path(), error = %e, "dispatch failed");
            }
            e.into_response()
        }
    }
}
