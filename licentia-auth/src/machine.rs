//! Bearer license-key authentication for `/mcp/*` and other machine-client
//! paths (`SPEC_FULL.md` §4.7).

use crate::rate_limit::RateLimiter;
use licentia_db::entities::CustomerStatus;
use licentia_db::{Db, DbError};
use licentia_license::{LicenseError, ParsedLicense};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MachineAuthError {
    #[error("missing or malformed bearer token")]
    MissingBearer,
    #[error(transparent)]
    License(#[from] LicenseError),
    #[error("customer not found for license key")]
    UnknownCustomer,
    #[error("customer is not active")]
    CustomerInactive,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error(transparent)]
    Storage(#[from] DbError),
}

/// Attached to the request context on successful authentication.
#[derive(Debug, Clone)]
pub struct MachinePrincipal {
    pub customer_id: Uuid,
    pub license: ParsedLicense,
    pub active_developer_seats: i32,
    pub active_stakeholder_seats: i32,
}

pub fn strip_bearer(header_value: &str) -> Result<&str, MachineAuthError> {
    header_value.strip_prefix("Bearer ").filter(|s| !s.is_empty()).ok_or(MachineAuthError::MissingBearer)
}

pub struct MachineAuthenticator {
    db: std::sync::Arc<Db>,
    license_secret: Vec<u8>,
    limiter: RateLimiter,
}

impl MachineAuthenticator {
    pub fn new(db: std::sync::Arc<Db>, license_secret: Vec<u8>) -> Self {
        Self { db, license_secret, limiter: RateLimiter::machine_default() }
    }

    pub async fn authenticate(&self, authorization_header: &str) -> Result<MachinePrincipal, MachineAuthError> {
        let key = strip_bearer(authorization_header)?;
        let license = licentia_license::parse(key, &self.license_secret, true)?;

        let customer = self.db.get_customer_by_license_key(key).await.map_err(|e| match e {
            DbError::NotFound => MachineAuthError::UnknownCustomer,
            other => MachineAuthError::Storage(other),
        })?;

        if !matches!(customer.status, CustomerStatus::Active) {
            return Err(MachineAuthError::CustomerInactive);
        }

        if !self.limiter.check(&customer.id.to_string()) {
            return Err(MachineAuthError::RateLimited);
        }

        Ok(MachinePrincipal {
            customer_id: customer.id,
            license,
            active_developer_seats: customer.active_developer_seats,
            active_stakeholder_seats: customer.active_stakeholder_seats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_bearer_rejects_missing_prefix() {
        assert!(matches!(strip_bearer("Basic abc"), Err(MachineAuthError::MissingBearer)));
    }

    #[test]
    fn strip_bearer_rejects_empty_token() {
        assert!(matches!(strip_bearer("Bearer "), Err(MachineAuthError::MissingBearer)));
    }

    #[test]
    fn strip_bearer_accepts_token() {
        assert_eq!(strip_bearer("Bearer SNOW-ENT-CUST-ABC123").unwrap(), "SNOW-ENT-CUST-ABC123");
    }
}
