use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use ferrobank_core::{DomainError, FieldViolation};
use ferrobank_infra::store::StoreError;
use ferrobank_infra::{TransferError, TransferErrorKind};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::UniqueViolation(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::ForeignKeyViolation(msg) => json_error(StatusCode::PRECONDITION_FAILED, "precondition_failed", msg),
        StoreError::CheckViolation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        e @ (StoreError::Deadlock(_)
        | StoreError::SerializationFailure(_)
        | StoreError::LockTimeout(_)
        | StoreError::Connection(_)) => {
            tracing::warn!(error = %e, "store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "temporarily unavailable, retry later")
        }
        StoreError::Database(msg) => {
            tracing::error!(error = %msg, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal server error")
        }
    }
}

pub fn transfer_error_to_response(err: TransferError) -> axum::response::Response {
    match err.kind() {
        TransferErrorKind::InvalidRequest => json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string()),
        TransferErrorKind::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        TransferErrorKind::ConstraintViolation => json_error(StatusCode::CONFLICT, "constraint_violation", err.to_string()),
        TransferErrorKind::Aborted => json_error(StatusCode::SERVICE_UNAVAILABLE, "aborted", err.to_string()),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
}

pub fn violations_to_response(violations: Vec<FieldViolation>) -> axum::response::Response {
    let message = violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.description))
        .collect::<Vec<_>>()
        .join("; ");
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn internal(context: &str, err: impl std::fmt::Display) -> axum::response::Response {
    tracing::error!(error = %err, "{context}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal server error")
}
