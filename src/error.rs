use crate::session::SessionError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

#[derive(Debug)]
pub enum HttpError {
    Internal(&'static str),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<SessionError> for HttpError {
    fn from(e: SessionError) -> Self {
        error!("session error: {}", e);
        HttpError::Internal("Unable to save session")
    }
}

impl From<handlebars::RenderError> for HttpError {
    fn from(e: handlebars::RenderError) -> Self {
        error!("failed to render page: {}", e);
        HttpError::Internal("Unable to render page")
    }
}
