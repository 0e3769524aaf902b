//! API error mapping
//! Mission: Turn domain refusals into stable HTTP status codes and JSON bodies

use crate::distribution::{ConflictKind, DistributionError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

#[derive(Debug)]
pub struct ApiError(pub DistributionError);

impl From<DistributionError> for ApiError {
    fn from(err: DistributionError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(DistributionError::Storage(err))
    }
}

fn conflict_body(kind: &ConflictKind) -> Value {
    let message = kind.to_string();
    match kind {
        ConflictKind::MissingPrerequisite { missing } => json!({
            "error": "missing_prerequisite",
            "message": message,
            "missingStage": missing,
        }),
        ConflictKind::AlreadyApproved { role, record } => json!({
            "error": "already_approved",
            "message": message,
            "stage": role,
            "approval": record,
        }),
        ConflictKind::InvalidStatus { status, .. } => json!({
            "error": "invalid_status",
            "message": message,
            "status": status,
        }),
        ConflictKind::AlreadyPaid {
            investor_id,
            reference,
        } => json!({
            "error": "already_paid",
            "message": message,
            "investorId": investor_id,
            "reference": reference,
        }),
        ConflictKind::InvalidPaymentStatus {
            investor_id,
            status,
            ..
        } => json!({
            "error": "invalid_payment_status",
            "message": message,
            "investorId": investor_id,
            "paymentStatus": status,
        }),
        ConflictKind::StaleWrite => json!({
            "error": "stale_write",
            "message": message,
        }),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            DistributionError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation_error", "message": msg }),
            ),
            DistributionError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": msg }),
            ),
            DistributionError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                json!({ "error": "forbidden", "message": msg }),
            ),
            DistributionError::Conflict(kind) => (StatusCode::CONFLICT, conflict_body(kind)),
            DistributionError::Allocation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "allocation_rejected", "message": err.to_string() }),
            ),
            DistributionError::Storage(err) => {
                tracing::error!("Storage error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error", "message": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
