use crate::auth::AuthError;
use crate::models::{AuthResponse, GenericResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

/// Errors returned by the image endpoints. Each one is rendered as a
/// [`GenericResponse`] with `success: false`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("the request could not be parsed or is missing required fields")]
    InvalidRequest,
    #[error("the image name or format contains illegal characters")]
    InvalidName,
    #[error("authentication is required")]
    NotLoggedIn,
    #[error("invalid auth token")]
    InvalidAuthToken,
    #[error("the image name is already in use")]
    AlreadyExists,
    #[error("image is not valid base64: {0}")]
    InvalidImageEncoding(#[from] base64::DecodeError),
    #[error("uploaded data is not an image")]
    InvalidMime,
    #[error("image not found")]
    NotFound,
    #[error("image is owned by another user")]
    NoPermissions,
    #[error("search is disabled")]
    SearchDisabled,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
    #[error("authentication error: {0}")]
    Auth(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidAuthToken => ApiError::InvalidAuthToken,
            AuthError::Database(e) => ApiError::Database(e),
            other => ApiError::Auth(other),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest | ApiError::InvalidName => StatusCode::BAD_REQUEST,
            ApiError::NotLoggedIn | ApiError::InvalidAuthToken => StatusCode::UNAUTHORIZED,
            ApiError::AlreadyExists | ApiError::NoPermissions | ApiError::SearchDisabled => {
                StatusCode::FORBIDDEN
            }
            ApiError::InvalidImageEncoding(_) | ApiError::InvalidMime => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Storage(_) | ApiError::Auth(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable status sent as `status-simple`.
    pub fn status_simple(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest => "invalid-request",
            ApiError::InvalidName => "invalid-name",
            ApiError::NotLoggedIn => "not-logged-in",
            ApiError::InvalidAuthToken => "invalid-authtoken",
            ApiError::AlreadyExists => "already-exists",
            ApiError::InvalidImageEncoding(_) => "invalid-image-encoding",
            ApiError::InvalidMime => "invalid-mime",
            ApiError::NotFound => "not-found",
            ApiError::NoPermissions => "no-permissions",
            ApiError::SearchDisabled => "search-disabled",
            ApiError::Database(_) => "database-error",
            ApiError::Storage(_) => "storage-error",
            ApiError::Auth(_) => "internal-error",
        }
    }

    fn status_readable(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest => "The request was malformed or missing required fields.",
            ApiError::InvalidName => {
                "Image names may only contain [a-zA-Z0-9_-] (max 32) and formats [a-zA-Z0-9] (max 16)."
            }
            ApiError::NotLoggedIn => {
                "This server requires authentication. Please log in or register."
            }
            ApiError::InvalidAuthToken => {
                "Your authentication token was incorrect. Please try logging in again."
            }
            ApiError::AlreadyExists => "The requested image name is already in use by another user.",
            ApiError::InvalidImageEncoding(_) => "The given image is not properly encoded in base64.",
            ApiError::InvalidMime => "The uploaded data is of an incorrect MIME type.",
            ApiError::NotFound => "The requested image does not exist.",
            ApiError::NoPermissions => "The requested image was not uploaded by you.",
            ApiError::SearchDisabled => "Searching is disabled on this server.",
            ApiError::Database(_) => {
                "An internal server error occurred while accessing the image database."
            }
            ApiError::Storage(_) => "An internal server error occurred while accessing image storage.",
            ApiError::Auth(_) => "An internal server error occurred while authenticating.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let body = GenericResponse::failure(self.status_simple(), self.status_readable());
        (status, Json(body)).into_response()
    }
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidRequest => StatusCode::BAD_REQUEST,
            AuthError::IncorrectPassword | AuthError::InvalidAuthToken => StatusCode::UNAUTHORIZED,
            AuthError::UserExists | AuthError::InvalidName => StatusCode::NOT_ACCEPTABLE,
            AuthError::Hash(_) | AuthError::Database(_) | AuthError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_simple(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest => "invalidrequest",
            AuthError::InvalidName => "invalidname",
            AuthError::UserExists => "userexists",
            AuthError::IncorrectPassword => "incorrectpassword",
            AuthError::InvalidAuthToken => "invalid-authtoken",
            AuthError::Hash(_) | AuthError::Database(_) | AuthError::Task(_) => "internalerror",
        }
    }

    fn error_readable(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest => "The request must contain a username and a password.",
            AuthError::InvalidName => {
                "The name you entered is invalid. Allowed names: [a-zA-Z0-9_-]{3,16}"
            }
            AuthError::UserExists => "The given username is already in use.",
            AuthError::IncorrectPassword => "The username or password was incorrect.",
            AuthError::InvalidAuthToken => "The authentication token was incorrect.",
            AuthError::Hash(_) | AuthError::Database(_) | AuthError::Task(_) => {
                "An internal server error occurred."
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Authentication failure: {}", self);
        }
        let body = AuthResponse {
            auth_token: None,
            error: Some(self.error_simple().to_string()),
            error_readable: Some(self.error_readable().to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_auth_errors_into_api_errors() {
        assert!(matches!(
            ApiError::from(AuthError::InvalidAuthToken),
            ApiError::InvalidAuthToken
        ));
        let err = ApiError::from(AuthError::IncorrectPassword);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::NotLoggedIn.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::AlreadyExists.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::InvalidMime.status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(AuthError::UserExists.status_code(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(AuthError::InvalidRequest.error_simple(), "invalidrequest");
    }
}
