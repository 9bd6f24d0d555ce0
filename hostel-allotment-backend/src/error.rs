use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hostel_allotment_core::{AdminError, AllotmentError, AttemptState, Denial, StoreError};
use hostel_allotment_identity::IdentityError;
use serde::Serialize;
use tracing::error;

pub const GENERIC_FAILURE: &str = "Something went wrong. Try again.";

pub static MANUAL_RECOVERY_HEADER: HeaderName = HeaderName::from_static("x-manual-recovery");

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid request body: {0}")]
    Json(#[from] JsonRejection),
    #[error("invalid path: {0}")]
    Path(#[from] PathRejection),
    #[error("invalid query: {0}")]
    Query(#[from] QueryRejection),
    #[error("Missing or invalid authorization header")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Denied(#[from] Denial),
    #[error(transparent)]
    Allotment(#[from] AllotmentError),
    #[error("identity provider failed: {0}")]
    Identity(#[from] IdentityError),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl From<AdminError> for AppError {
    fn from(value: AdminError) -> Self {
        match value {
            AdminError::RoomNotFound => Self::NotFound(value.to_string()),
            AdminError::MissingTitle | AdminError::WindowNotAfterOpen => {
                Self::Validation(value.to_string())
            }
            AdminError::Store(err) => Self::Store(err),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => error_response(StatusCode::BAD_REQUEST, &message),
            err @ (Self::Json(_) | Self::Path(_) | Self::Query(_)) => {
                error_response(StatusCode::BAD_REQUEST, &err.to_string())
            }
            err @ (Self::MissingToken | Self::InvalidToken) => {
                error_response(StatusCode::UNAUTHORIZED, &err.to_string())
            }
            Self::Forbidden(message) => error_response(StatusCode::FORBIDDEN, message),
            Self::NotFound(message) => error_response(StatusCode::NOT_FOUND, &message),
            Self::Denied(denial) => error_response(StatusCode::CONFLICT, &denial.to_string()),
            Self::Allotment(err) => allotment_failure(&err),
            Self::Identity(err) => {
                error!("identity verification failed: {err}");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed")
            }
            Self::Store(err) => {
                error!("{err}");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE)
            }
        }
    }
}

fn allotment_failure(err: &AllotmentError) -> Response {
    if let Some(denial) = err.denial() {
        return error_response(StatusCode::CONFLICT, &denial.to_string());
    }
    let mut response = error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE);
    if err.state() == AttemptState::Inconsistent {
        // the coordinator already logged the lost allotment
        response
            .headers_mut()
            .insert(MANUAL_RECOVERY_HEADER.clone(), HeaderValue::from_static("true"));
    } else {
        error!(state = %err.state(), "allotment failed: {err}");
    }
    response
}
