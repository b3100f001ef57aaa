//! Domain-error-to-HTTP mapping per `SPEC_FULL.md` §7. Handlers return
//! `Result<_, ApiError>`; this is the only place that knows about status
//! codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use licentia_auth::{MachineAuthError, SsoError};
use licentia_db::DbError;
use licentia_license::LicenseError;
use licentia_seats::SeatError;
use licentia_vault::VaultError;
use serde_json::json;

pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "input_malformed", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "code": self.code, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", "resource not found"),
            DbError::UniqueViolation(_) => Self::new(StatusCode::CONFLICT, "unique_violation", "resource already exists"),
            DbError::TransientStorage(msg) => Self::new(StatusCode::SERVICE_UNAVAILABLE, "transient_storage", msg),
            DbError::StorageFatal(msg) => {
                tracing::error!(error = %msg, "storage fatal");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_fatal", "internal storage error")
            }
        }
    }
}

impl From<LicenseError> for ApiError {
    fn from(e: LicenseError) -> Self {
        match e {
            LicenseError::LicenseMalformed => Self::new(StatusCode::BAD_REQUEST, "input_malformed", e.to_string()),
            LicenseError::LicenseChecksumInvalid => Self::new(StatusCode::FORBIDDEN, "license_checksum_invalid", e.to_string()),
            LicenseError::LicenseExpired => Self::new(StatusCode::FORBIDDEN, "license_expired", e.to_string()),
        }
    }
}

impl From<MachineAuthError> for ApiError {
    fn from(e: MachineAuthError) -> Self {
        match e {
            MachineAuthError::MissingBearer => Self::new(StatusCode::UNAUTHORIZED, "auth_missing", e.to_string()),
            MachineAuthError::License(inner) => inner.into(),
            MachineAuthError::UnknownCustomer => Self::new(StatusCode::UNAUTHORIZED, "auth_invalid", e.to_string()),
            MachineAuthError::CustomerInactive => Self::new(StatusCode::FORBIDDEN, "customer_inactive", e.to_string()),
            MachineAuthError::RateLimited => Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", e.to_string()),
            MachineAuthError::Storage(inner) => inner.into(),
        }
    }
}

impl From<SsoError> for ApiError {
    fn from(e: SsoError) -> Self {
        match e {
            SsoError::SsoRequired => Self::new(StatusCode::UNAUTHORIZED, "sso_required", e.to_string()),
            SsoError::AssertionInvalid(msg) => Self::new(StatusCode::UNAUTHORIZED, "auth_invalid", msg),
            SsoError::Storage(inner) => inner.into(),
        }
    }
}

impl From<SeatError> for ApiError {
    fn from(e: SeatError) -> Self {
        match e {
            SeatError::CustomerInactive => Self::new(StatusCode::FORBIDDEN, "customer_inactive", e.to_string()),
            SeatError::SeatLimitExceeded { limit, active, role } => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "seat_limit_exceeded",
                format!("{{\"limit\":{limit},\"active\":{active},\"role\":\"{role:?}\"}}"),
            ),
            SeatError::Storage(inner) => inner.into(),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Storage(inner) => inner.into(),
            VaultError::Envelope(inner) => {
                tracing::error!(error = %inner, "credential unreadable or cipher integrity failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "credential_unreadable", inner.to_string())
            }
        }
    }
}
