use serde::Serialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{reject, Filter, Rejection, Reply};

use crate::error::VaultError;
use crate::vault::PhotoVault;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub timestamp: String,
}

/// A `VaultError` carried through warp's rejection chain.
#[derive(Debug)]
pub struct VaultRejection {
    pub status: StatusCode,
    pub message: String,
}

impl reject::Reject for VaultRejection {}

pub fn status_for(error: &VaultError) -> StatusCode {
    match error {
        VaultError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        VaultError::NotFound(_) => StatusCode::NOT_FOUND,
        VaultError::Config(_) | VaultError::Conflict(_) => StatusCode::CONFLICT,
        VaultError::Corrupted(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn vault_rejection(error: VaultError) -> Rejection {
    let status = status_for(&error);
    if status.is_server_error() {
        log::error!("Request failed: {}", error);
    } else {
        log::debug!("Request rejected: {}", error);
    }
    reject::custom(VaultRejection {
        status,
        message: error.to_string(),
    })
}

pub fn with_vault(vault: PhotoVault) -> impl Filter<Extract = (PhotoVault,), Error = Infallible> + Clone {
    warp::any().map(move || vault.clone())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;
    let timestamp = chrono::Utc::now().to_rfc3339();

    if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if let Some(vault_error) = err.find::<VaultRejection>() {
        code = vault_error.status;
        message = vault_error.message.clone();
    } else if let Some(body_error) = err.find::<warp::filters::body::BodyDeserializeError>() {
        code = StatusCode::BAD_REQUEST;
        message = format!("Invalid request body: {}", body_error);
    } else if let Some(query_error) = err.find::<warp::reject::InvalidQuery>() {
        code = StatusCode::BAD_REQUEST;
        message = format!("Invalid query: {}", query_error);
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        code = StatusCode::PAYLOAD_TOO_LARGE;
        message = "Payload too large".to_string();
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        code = StatusCode::UNSUPPORTED_MEDIA_TYPE;
        message = "Unsupported media type".to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed".to_string();
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
    }

    let error_response = ErrorResponse {
        error: message,
        code: code.as_u16(),
        timestamp,
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&error_response),
        code,
    ))
}

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&VaultError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&VaultError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&VaultError::Config("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&VaultError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&VaultError::Corrupted("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&VaultError::Cancelled),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
