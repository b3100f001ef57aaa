//! Seat admission control: `tryConnect`, heartbeat, disconnect, and the
//! background reaper. This is the most intricate subsystem in the server —
//! see `SPEC_FULL.md` §4.5 for the full admission protocol this module
//! implements line for line.

pub mod reaper;

use chrono::{Duration, Utc};
use licentia_db::entities::{ConnectionEventKind, CustomerStatus, Role};
use licentia_db::repo_connection::append_event;
use licentia_db::{Db, DbError};
use licentia_license::SeatLimit;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SeatError {
    #[error("customer is not active")]
    CustomerInactive,
    #[error("seat limit exceeded: {active}/{limit} {role:?} seats in use")]
    SeatLimitExceeded { limit: u32, active: u32, role: Role },
    #[error(transparent)]
    Storage(#[from] DbError),
}

#[derive(Debug, Clone)]
pub struct SeatConfig {
    /// Window after a seat's last heartbeat during which a reconnect from
    /// the same user is treated as a refresh, not a new admission.
    pub grace_period: Duration,
}

impl Default for SeatConfig {
    fn default() -> Self {
        Self { grace_period: Duration::minutes(5) }
    }
}

pub struct TryConnectRequest {
    pub customer_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub jwt_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub connection_id: Uuid,
    pub role: Role,
    /// `None` for unlimited seats.
    pub seat_limit: Option<u32>,
    pub active: u32,
}

pub struct SeatManager {
    db: Arc<Db>,
    config: SeatConfig,
}

impl SeatManager {
    pub fn new(db: Arc<Db>, config: SeatConfig) -> Self {
        Self { db, config }
    }

    /// `§4.5` admission protocol.
    pub async fn try_connect(&self, req: TryConnectRequest) -> Result<ConnectResult, SeatError> {
        let customer = self.db.get_customer(req.customer_id).await.map_err(|e| match e {
            DbError::NotFound => SeatError::CustomerInactive,
            other => SeatError::Storage(other),
        })?;

        if !matches!(customer.status, CustomerStatus::Active) {
            return Err(SeatError::CustomerInactive);
        }

        let limit = match req.role {
            Role::Admin => SeatLimit::Unlimited,
            Role::Developer => SeatLimit::from_storage(customer.developer_seats),
            Role::Stakeholder => SeatLimit::from_storage(customer.stakeholder_seats),
        };

        let gated = customer.seat_limits_enforced && req.role != Role::Admin && limit.gates_admission();
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        self.db.get_customer_for_update(&mut tx, req.customer_id).await?;

        if gated {
            let SeatLimit::Limited(n) = limit else { unreachable!("gated implies Limited") };
            let active = self.db.count_active(&mut tx, req.customer_id, req.role).await?;
            if active >= n as i64 {
                let existing = self.db.get_connection(&mut tx, req.customer_id, &req.user_id, req.role).await?;
                let in_grace = existing
                    .as_ref()
                    .map(|c| now.signed_duration_since(c.last_seen) <= self.config.grace_period)
                    .unwrap_or(false);

                if !in_grace {
                    tx.rollback().await.map_err(DbError::from)?;
                    append_event(
                        self.db.pool(),
                        req.customer_id,
                        &req.user_id,
                        req.role,
                        ConnectionEventKind::Rejected,
                        req.ip.as_deref(),
                        None,
                        Some(n as i32),
                        Some(active as i32),
                    )
                    .await?;
                    return Err(SeatError::SeatLimitExceeded { limit: n, active: active as u32, role: req.role });
                }
            }
        }

        let (new_id, old_id) = self
            .db
            .upsert_connection(
                &mut tx,
                req.customer_id,
                &req.user_id,
                req.role,
                req.ip.as_deref(),
                req.user_agent.as_deref(),
                req.jwt_hash.as_deref(),
                now,
            )
            .await?;

        self.db
            .upsert_user(
                &mut tx,
                &req.user_id,
                Some(req.customer_id),
                None,
                None,
                None,
                None,
                req.role,
                req.ip.as_deref(),
                req.user_agent.as_deref(),
            )
            .await?;

        if old_id.is_some() {
            append_event(
                &mut *tx,
                req.customer_id,
                &req.user_id,
                req.role,
                ConnectionEventKind::Disconnect,
                req.ip.as_deref(),
                None,
                None,
                None,
            )
            .await?;
        }

        let (dev_count, stake_count) = self.db.recompute_and_write_seat_counts(&mut tx, req.customer_id).await?;
        let active_for_role = match req.role {
            Role::Developer => dev_count,
            Role::Stakeholder => stake_count,
            Role::Admin => dev_count + stake_count,
        };

        let seat_limit_val = match limit {
            SeatLimit::Unlimited => None,
            SeatLimit::Limited(n) => Some(n as i32),
        };

        append_event(
            &mut *tx,
            req.customer_id,
            &req.user_id,
            req.role,
            ConnectionEventKind::Connect,
            req.ip.as_deref(),
            None,
            seat_limit_val,
            Some(active_for_role as i32),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        Ok(ConnectResult {
            connection_id: new_id,
            role: req.role,
            seat_limit: seat_limit_val.map(|n| n as u32),
            active: active_for_role as u32,
        })
    }

    /// Refreshes `lastSeen`. Returns `false` if no matching row exists, in
    /// which case the client must call `try_connect` again.
    pub async fn heartbeat(&self, customer_id: Uuid, user_id: &str, role: Role) -> Result<bool, SeatError> {
        Ok(self.db.touch_heartbeat(customer_id, user_id, role).await?)
    }

    pub async fn disconnect(
        &self,
        customer_id: Uuid,
        user_id: &str,
        role: Role,
        ip: Option<&str>,
    ) -> Result<bool, SeatError> {
        let mut tx = self.db.begin().await?;
        let existed = self.db.delete_connection(&mut tx, customer_id, user_id, role).await?;
        if existed {
            append_event(&mut *tx, customer_id, user_id, role, ConnectionEventKind::Disconnect, ip, None, None, None)
                .await?;
            self.db.recompute_and_write_seat_counts(&mut tx, customer_id).await?;
        }
        tx.commit().await.map_err(DbError::from)?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    //! These exercise the pure decision logic (seat-limit math, grace-period
    //! arithmetic) without a database. Seat enforcement happy path,
    //! reconnect-within-grace, and reaper correctness are covered against a
    //! real database in `tests/seat_scenarios.rs`, gated on
    //! `TEST_DATABASE_URL`.
    use super::*;

    #[test]
    fn unlimited_seat_never_gates() {
        assert!(!SeatLimit::Unlimited.gates_admission());
    }

    #[test]
    fn limited_seat_gates() {
        assert!(SeatLimit::Limited(2).gates_admission());
    }

    #[test]
    fn grace_window_is_inclusive_at_the_edge() {
        let grace = Duration::minutes(5);
        let last_seen = Utc::now() - Duration::minutes(5);
        let now = Utc::now();
        assert!(now.signed_duration_since(last_seen) <= grace + Duration::milliseconds(50));
    }
}
