use crate::entities::{Role, User, UserStatus};
use crate::{Db, DbResult};
use sqlx::{postgres::PgRow, Postgres, Row, Transaction};
use uuid::Uuid;

fn row_to_user(row: &PgRow) -> sqlx::Result<User> {
    let role_raw: String = row.try_get("role")?;
    let status_raw: String = row.try_get("status")?;
    Ok(User {
        user_id: row.try_get("user_id")?,
        customer_id: row.try_get("customer_id")?,
        service_integrator_id: row.try_get("service_integrator_id")?,
        raw_machine_id: row.try_get("raw_machine_id")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        role: Role::parse(&role_raw).unwrap_or(Role::Developer),
        status: UserStatus::parse(&status_raw).unwrap_or(UserStatus::Active),
        last_login_at: row.try_get("last_login_at")?,
        last_seen_ip: row.try_get("last_seen_ip")?,
        last_seen_ua: row.try_get("last_seen_ua")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Db {
    /// Upserts the `User` record for a machine principal on every
    /// successful admission (`SPEC_FULL.md` §2's `User` entity). Called
    /// inside the caller's `tryConnect` transaction so the login bump
    /// lands with the connection row or not at all.
    pub async fn upsert_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        customer_id: Option<Uuid>,
        service_integrator_id: Option<Uuid>,
        raw_machine_id: Option<&str>,
        display_name: Option<&str>,
        email: Option<&str>,
        role: Role,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> DbResult<User> {
        let row = sqlx::query(
            r#"INSERT INTO users
                 (user_id, customer_id, service_integrator_id, raw_machine_id, display_name,
                  email, role, last_login_at, last_seen_ip, last_seen_ua)
               VALUES ($1,$2,$3,$4,$5,$6,$7,now(),$8,$9)
               ON CONFLICT (user_id, customer_id, service_integrator_id) DO UPDATE SET
                 display_name = COALESCE(EXCLUDED.display_name, users.display_name),
                 email = COALESCE(EXCLUDED.email, users.email),
                 last_login_at = now(),
                 last_seen_ip = EXCLUDED.last_seen_ip,
                 last_seen_ua = EXCLUDED.last_seen_ua,
                 updated_at = now()
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(customer_id)
        .bind(service_integrator_id)
        .bind(raw_machine_id)
        .bind(display_name)
        .bind(email)
        .bind(role.as_str())
        .bind(ip)
        .bind(user_agent)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row_to_user(&row)?)
    }

    pub async fn get_user(&self, user_id: &str, customer_id: Option<Uuid>) -> DbResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE user_id = $1 AND customer_id IS NOT DISTINCT FROM $2")
            .bind(user_id)
            .bind(customer_id)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_user(&row)?)
    }
}
