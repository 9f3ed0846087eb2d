use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};

use crate::config::ConfigError;
use crate::validation::ValidationErrors;

/// Error
///
/// The single error family shared by the persistence layer, repositories, access
/// policy and request router. Each variant maps onto one HTTP-equivalent status
/// through [`Error::code`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed table or column declaration. Fatal: the calling code must be fixed.
    #[error("schema error: {0}")]
    Schema(String),

    /// Unknown table, route or page.
    #[error("not found: {0}")]
    NotFound(String),

    /// The principal does not satisfy the route's requirement.
    /// `login` is the entry point the caller should be sent to.
    #[error("unauthorized, login required at {login}")]
    Unauthorized { login: String },

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Read failure reported by the store.
    #[error("query failed: {context}")]
    Query {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// Write failure reported by the store.
    #[error("persistence failed: {context}")]
    Persistence {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Logs the native store diagnostic and wraps it as a read failure.
    pub fn query(context: impl Into<String>, source: sqlx::Error) -> Self {
        let context = context.into();
        tracing::error!(error = %source, "{context}");
        Error::Query { context, source }
    }

    /// Logs the native store diagnostic and wraps it as a write failure.
    pub fn persistence(context: impl Into<String>, source: sqlx::Error) -> Self {
        let context = context.into();
        tracing::error!(error = %source, "{context}");
        Error::Persistence { context, source }
    }

    pub fn unauthorized(login: impl Into<String>) -> Self {
        Error::Unauthorized {
            login: login.into(),
        }
    }

    /// True for both read and write store failures.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Query { .. } | Error::Persistence { .. })
    }

    /// HTTP-equivalent status code.
    pub fn code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Unauthorized { .. } => 401,
            Error::Validation(_) => 422,
            _ => 500,
        }
    }
}

/// Converts domain errors into responses for the HTTP surface.
///
/// Unauthorized requests are redirected to the login entry point; callers that
/// prefer a bare 401 handle that variant before falling through to this impl.
/// Store diagnostics are never written into the response body.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
            Error::Unauthorized { login } => Redirect::to(&format!("/{login}")).into_response(),
            Error::Validation(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(errors)).into_response()
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}
