use crate::entities::{Customer, CustomerStatus};
use crate::{Db, DbResult};
use sqlx::{postgres::PgRow, Postgres, Row, Transaction};
use uuid::Uuid;

pub(crate) fn row_to_customer(row: &PgRow) -> sqlx::Result<Customer> {
    let status_raw: String = row.try_get("status")?;
    Ok(Customer {
        id: row.try_get("id")?,
        service_integrator_id: row.try_get("service_integrator_id")?,
        display_name: row.try_get("display_name")?,
        contact_email: row.try_get("contact_email")?,
        license_key: row.try_get("license_key")?,
        theme_id: row.try_get("theme_id")?,
        developer_seats: row.try_get("developer_seats")?,
        stakeholder_seats: row.try_get("stakeholder_seats")?,
        active_developer_seats: row.try_get("active_developer_seats")?,
        active_stakeholder_seats: row.try_get("active_stakeholder_seats")?,
        seat_limits_enforced: row.try_get("seat_limits_enforced")?,
        status: CustomerStatus::parse(&status_raw).unwrap_or(CustomerStatus::Active),
        api_call_count: row.try_get("api_call_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Db {
    pub async fn create_customer(
        &self,
        service_integrator_id: Uuid,
        display_name: &str,
        contact_email: &str,
        license_key: &str,
        developer_seats: i32,
        stakeholder_seats: i32,
        seat_limits_enforced: bool,
    ) -> DbResult<Customer> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"INSERT INTO customers
                 (id, service_integrator_id, display_name, contact_email, license_key,
                  developer_seats, stakeholder_seats, seat_limits_enforced)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING *"#,
        )
        .bind(id)
        .bind(service_integrator_id)
        .bind(display_name)
        .bind(contact_email)
        .bind(license_key)
        .bind(developer_seats)
        .bind(stakeholder_seats)
        .bind(seat_limits_enforced)
        .fetch_one(self.pool())
        .await?;
        Ok(row_to_customer(&row)?)
    }

    pub async fn get_customer(&self, id: Uuid) -> DbResult<Customer> {
        let row = sqlx::query("SELECT * FROM customers WHERE id = $1")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_customer(&row)?)
    }

    pub async fn get_customer_by_license_key(&self, license_key: &str) -> DbResult<Customer> {
        let row = sqlx::query("SELECT * FROM customers WHERE license_key = $1")
            .bind(license_key)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_customer(&row)?)
    }

    /// Same lookup, but locks the row for the duration of the caller's
    /// transaction — used by the seat manager's `tryConnect` per the
    /// spec's `SELECT … FOR UPDATE` strict-bounding option.
    pub async fn get_customer_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> DbResult<Customer> {
        let row = sqlx::query("SELECT * FROM customers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(row_to_customer(&row)?)
    }

    pub async fn update_customer_status(&self, id: Uuid, status: CustomerStatus) -> DbResult<()> {
        sqlx::query("UPDATE customers SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_seat_totals(
        &self,
        id: Uuid,
        developer_seats: i32,
        stakeholder_seats: i32,
        seat_limits_enforced: bool,
    ) -> DbResult<()> {
        sqlx::query(
            r#"UPDATE customers
               SET developer_seats = $1, stakeholder_seats = $2, seat_limits_enforced = $3, updated_at = now()
               WHERE id = $4"#,
        )
        .bind(developer_seats)
        .bind(stakeholder_seats)
        .bind(seat_limits_enforced)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Writes the live per-role active counts back onto the customer row,
    /// inside the caller's transaction, per `§4.5` step 6.
    pub async fn write_active_seat_counts(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        active_developer_seats: i64,
        active_stakeholder_seats: i64,
    ) -> DbResult<()> {
        sqlx::query(
            r#"UPDATE customers
               SET active_developer_seats = $1, active_stakeholder_seats = $2, updated_at = now()
               WHERE id = $3"#,
        )
        .bind(active_developer_seats as i32)
        .bind(active_stakeholder_seats as i32)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_customers(&self, limit: i64, offset: i64) -> DbResult<Vec<Customer>> {
        let rows = sqlx::query("SELECT * FROM customers ORDER BY created_at LIMIT $1 OFFSET $2")
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_customer).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    pub async fn begin(&self) -> DbResult<Transaction<'_, Postgres>> {
        Ok(self.pool().begin().await?)
    }
}
