use crate::entities::{IntegratorStatus, ServiceIntegrator};
use crate::{Db, DbResult};
use sqlx::Row;
use uuid::Uuid;

fn row_to_si(row: &sqlx::postgres::PgRow) -> sqlx::Result<ServiceIntegrator> {
    let status_raw: String = row.try_get("status")?;
    Ok(ServiceIntegrator {
        id: row.try_get("id")?,
        company_name: row.try_get("company_name")?,
        contact_email: row.try_get("contact_email")?,
        billing_email: row.try_get("billing_email")?,
        master_license_key: row.try_get("master_license_key")?,
        white_label_config: row.try_get("white_label_config")?,
        status: IntegratorStatus::parse(&status_raw).unwrap_or(IntegratorStatus::Active),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Db {
    pub async fn create_service_integrator(
        &self,
        company_name: &str,
        contact_email: &str,
        billing_email: &str,
        master_license_key: &str,
    ) -> DbResult<ServiceIntegrator> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"INSERT INTO service_integrators (id, company_name, contact_email, billing_email, master_license_key)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING *"#,
        )
        .bind(id)
        .bind(company_name)
        .bind(contact_email)
        .bind(billing_email)
        .bind(master_license_key)
        .fetch_one(self.pool())
        .await?;
        Ok(row_to_si(&row)?)
    }

    pub async fn get_service_integrator(&self, id: Uuid) -> DbResult<ServiceIntegrator> {
        let row = sqlx::query("SELECT * FROM service_integrators WHERE id = $1")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_si(&row)?)
    }

    pub async fn get_service_integrator_by_key(&self, master_license_key: &str) -> DbResult<ServiceIntegrator> {
        let row = sqlx::query("SELECT * FROM service_integrators WHERE master_license_key = $1")
            .bind(master_license_key)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_si(&row)?)
    }
}
