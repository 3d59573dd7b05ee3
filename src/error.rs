//! Service-level error taxonomy and its HTTP mapping.
//!
//! Admin paths surface these directly; the proxy hot path never does
//! (an unknown host is a branded 404 and scorer failures degrade silently).

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or out-of-range client input.
    #[error("{0}")]
    InvalidInput(String),

    /// Tenant does not own the target resource.
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Duplicate record, conflicting ownership, and similar collisions.
    #[error("{0}")]
    Conflict(String),

    /// RDAP answered, but the registrar's nameservers do not cover the
    /// assigned pair. Carries the diff for the dashboard.
    #[error("nameserver verification failed")]
    VerificationFailed {
        assigned: Vec<String>,
        found: Vec<String>,
    },

    /// RDAP could not be reached or parsed; domain status is untouched
    /// and the client should retry.
    #[error("verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) | ServiceError::VerificationFailed { .. } => {
                StatusCode::CONFLICT
            }
            ServiceError::VerificationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({ "error": self.to_string() });
        if let ServiceError::VerificationFailed { assigned, found } = self {
            body["assigned_ns"] = json!(assigned);
            body["found_at_registrar"] = json!(found);
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
