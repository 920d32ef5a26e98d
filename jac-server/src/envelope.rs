//! HTTP envelope construction and error → status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use jac_core::envelope::Transport;
use jac_core::error::RuntimeError;

/// Wrap a success payload in the transport envelope.
pub fn ok(kind: &str, data: serde_json::Value) -> Response {
    (StatusCode::OK, Json(Transport::success(kind, data))).into_response()
}

pub fn created(kind: &str, data: serde_json::Value) -> Response {
    (StatusCode::CREATED, Json(Transport::success(kind, data))).into_response()
}

pub fn error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(Transport::failure("error", code, message.into())),
    )
        .into_response()
}

pub fn unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing or invalid token")
}

pub fn forbidden(message: impl Into<String>) -> Response {
    error(StatusCode::FORBIDDEN, "FORBIDDEN", message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn unknown_callable(name: &str) -> Response {
    error(
        StatusCode::METHOD_NOT_ALLOWED,
        "UNKNOWN_CALLABLE",
        format!("no callable named '{name}'"),
    )
}

pub fn validation(message: impl Into<String>) -> Response {
    error(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION", message)
}

pub fn service_unavailable(message: impl Into<String>) -> Response {
    error(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
}

/// Map a runtime failure onto the envelope. Access denials were already
/// rewritten to not-found inside the runtime.
pub fn runtime_error(err: RuntimeError) -> Response {
    let err = err.sanitized();
    let status = match &err {
        RuntimeError::NotFound(_) => StatusCode::NOT_FOUND,
        RuntimeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        RuntimeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        RuntimeError::AmbiguousAbility { .. } | RuntimeError::UserError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        RuntimeError::AccessDenied(_) => StatusCode::NOT_FOUND,
    };
    error(status, err.code(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_not_found_maps_to_404() {
        let response = runtime_error(RuntimeError::NotFound("anchor x".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn access_denied_maps_to_404_not_403() {
        let response = runtime_error(RuntimeError::AccessDenied("anchor x".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_argument_maps_to_400() {
        let response = runtime_error(RuntimeError::InvalidArgument("bad".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn timeout_maps_to_504() {
        let response = runtime_error(RuntimeError::Timeout);
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
