use axum::{
    http,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type WebResult<T> = std::result::Result<T, WebError>;

/// Errors from the HTML pages.
#[derive(thiserror::Error, Debug)]
pub enum WebError {
    #[error("Internal Server Error: {0}")]
    Internal(#[from] anyhow::Error),
    #[error("Templating error: {0:#}")]
    Template(#[from] minijinja::Error),
    #[error("Not found")]
    NotFound,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            WebError::Internal(ref err) => {
                tracing::error!("{:#}", err);
                (http::StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
            WebError::Template(_) => {
                tracing::error!("{}", message);
                (http::StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
            WebError::NotFound => (http::StatusCode::NOT_FOUND, "Not Found").into_response(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors from the JSON API, always rendered as `{"error": "..."}`.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => http::StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => http::StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("{:#}", err);
        ApiError::Internal("Internal Server Error".into())
    }
}
