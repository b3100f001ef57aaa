use crate::entities::{ActiveConnection, ConnectionEvent, ConnectionEventKind, Role};
use crate::{Db, DbResult};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Executor, Postgres, Row, Transaction};
use uuid::Uuid;

fn row_to_connection(row: &PgRow) -> sqlx::Result<ActiveConnection> {
    let role_raw: String = row.try_get("role")?;
    Ok(ActiveConnection {
        connection_id: row.try_get("connection_id")?,
        customer_id: row.try_get("customer_id")?,
        user_id: row.try_get("user_id")?,
        role: Role::parse(&role_raw).unwrap_or(Role::Developer),
        ip: row.try_get("ip")?,
        user_agent: row.try_get("user_agent")?,
        connected_at: row.try_get("connected_at")?,
        last_seen: row.try_get("last_seen")?,
        jwt_hash: row.try_get("jwt_hash")?,
    })
}

impl Db {
    /// Looks up the single possible row for `(customer_id, user_id, role)`,
    /// locking it if a transaction is supplied — used both for the
    /// grace-period check and by the upsert below.
    pub async fn get_connection(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
        user_id: &str,
        role: Role,
    ) -> DbResult<Option<ActiveConnection>> {
        let row = sqlx::query(
            "SELECT * FROM active_connections WHERE customer_id = $1 AND user_id = $2 AND role = $3 FOR UPDATE",
        )
        .bind(customer_id)
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.as_ref().map(row_to_connection).transpose()?)
    }

    pub async fn count_active(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
        role: Role,
    ) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM active_connections WHERE customer_id = $1 AND role = $2")
            .bind(customer_id)
            .bind(role.as_str())
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    /// Atomic upsert on `(customer_id, user_id, role)`. Returns the new
    /// connection id and, if a row already existed with a *different*
    /// connection id, that old id (so the caller can emit a `disconnect`
    /// event for it per `§4.5` step 5).
    pub async fn upsert_connection(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
        user_id: &str,
        role: Role,
        ip: Option<&str>,
        user_agent: Option<&str>,
        jwt_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<(Uuid, Option<Uuid>)> {
        let existing = self.get_connection(tx, customer_id, user_id, role).await?;
        let new_id = Uuid::new_v4();

        sqlx::query(
            r#"INSERT INTO active_connections
                 (connection_id, customer_id, user_id, role, ip, user_agent, connected_at, last_seen, jwt_hash)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8)
               ON CONFLICT (customer_id, user_id, role) DO UPDATE SET
                 connection_id = EXCLUDED.connection_id,
                 ip = EXCLUDED.ip,
                 user_agent = EXCLUDED.user_agent,
                 connected_at = EXCLUDED.connected_at,
                 last_seen = EXCLUDED.last_seen,
                 jwt_hash = EXCLUDED.jwt_hash"#,
        )
        .bind(new_id)
        .bind(customer_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(ip)
        .bind(user_agent)
        .bind(now)
        .bind(jwt_hash)
        .execute(&mut **tx)
        .await?;

        let old_id = existing.map(|c| c.connection_id).filter(|old| *old != new_id);
        Ok((new_id, old_id))
    }

    pub async fn touch_heartbeat(&self, customer_id: Uuid, user_id: &str, role: Role) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE active_connections SET last_seen = now() WHERE customer_id = $1 AND user_id = $2 AND role = $3",
        )
        .bind(customer_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_connection(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
        user_id: &str,
        role: Role,
    ) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM active_connections WHERE customer_id = $1 AND user_id = $2 AND role = $3")
            .bind(customer_id)
            .bind(user_id)
            .bind(role.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every row whose `last_seen` is strictly before `stale_before`
    /// and returns the deleted rows, for the reaper to audit.
    pub async fn delete_stale_connections(&self, stale_before: DateTime<Utc>) -> DbResult<Vec<ActiveConnection>> {
        let rows = sqlx::query("DELETE FROM active_connections WHERE last_seen < $1 RETURNING *")
            .bind(stale_before)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_connection).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    /// Recomputes both per-role active counts from `active_connections` and
    /// writes them onto the customer row, all inside `tx` — `§4.5` step 6.
    pub async fn recompute_and_write_seat_counts(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
    ) -> DbResult<(i64, i64)> {
        let dev = self.count_active(tx, customer_id, Role::Developer).await?;
        let stake = self.count_active(tx, customer_id, Role::Stakeholder).await?;
        self.write_active_seat_counts(tx, customer_id, dev, stake).await?;
        Ok((dev, stake))
    }

    /// Same as above but takes the plain pool, for use outside a caller's
    /// transaction (e.g. the reaper, which opens its own per-customer tx).
    pub async fn recompute_and_write_seat_counts_standalone(&self, customer_id: Uuid) -> DbResult<(i64, i64)> {
        let mut tx = self.begin().await?;
        let counts = self.recompute_and_write_seat_counts(&mut tx, customer_id).await?;
        tx.commit().await?;
        Ok(counts)
    }
}

pub async fn append_event<'e, E>(
    executor: E,
    customer_id: Uuid,
    user_id: &str,
    role: Role,
    event: ConnectionEventKind,
    ip: Option<&str>,
    error_message: Option<&str>,
    seat_limit: Option<i32>,
    active_count: Option<i32>,
) -> DbResult<ConnectionEvent>
where
    E: Executor<'e, Database = Postgres>,
{
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r#"INSERT INTO connection_events (id, customer_id, user_id, role, event, ip, error_message, seat_limit, active_count)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           RETURNING *"#,
    )
    .bind(id)
    .bind(customer_id)
    .bind(user_id)
    .bind(role.as_str())
    .bind(event.as_str())
    .bind(ip)
    .bind(error_message)
    .bind(seat_limit)
    .bind(active_count)
    .fetch_one(executor)
    .await?;

    let event_raw: String = row.try_get("event")?;
    Ok(ConnectionEvent {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        user_id: row.try_get("user_id")?,
        role: Role::parse(&row.try_get::<String, _>("role")?).unwrap_or(Role::Developer),
        event: parse_event_kind(&event_raw),
        timestamp: row.try_get("timestamp")?,
        ip: row.try_get("ip")?,
        error_message: row.try_get("error_message")?,
        seat_limit: row.try_get("seat_limit")?,
        active_count: row.try_get("active_count")?,
    })
}

fn parse_event_kind(raw: &str) -> ConnectionEventKind {
    match raw {
        "connect" => ConnectionEventKind::Connect,
        "disconnect" => ConnectionEventKind::Disconnect,
        "heartbeat" => ConnectionEventKind::Heartbeat,
        "timeout" => ConnectionEventKind::Timeout,
        "rejected" => ConnectionEventKind::Rejected,
        _ => ConnectionEventKind::Rejected,
    }
}
