use crate::entities::Theme;
use crate::{Db, DbResult};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

fn row_to_theme(row: &PgRow) -> sqlx::Result<Theme> {
    Ok(Theme {
        id: row.try_get("id")?,
        service_integrator_id: row.try_get("service_integrator_id")?,
        key: row.try_get("key")?,
        display_name: row.try_get("display_name")?,
        primary_color: row.try_get("primary_color")?,
        secondary_color: row.try_get("secondary_color")?,
        is_active: row.try_get("is_active")?,
        is_default: row.try_get("is_default")?,
        blob: row.try_get("blob")?,
    })
}

impl Db {
    pub async fn get_theme(&self, id: Uuid) -> DbResult<Theme> {
        let row = sqlx::query("SELECT * FROM themes WHERE id = $1")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_theme(&row)?)
    }

    pub async fn list_themes(&self, service_integrator_id: Uuid) -> DbResult<Vec<Theme>> {
        let rows = sqlx::query("SELECT * FROM themes WHERE service_integrator_id = $1 ORDER BY key")
            .bind(service_integrator_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_theme).collect::<sqlx::Result<_>>().map_err(Into::into)
    }
}
