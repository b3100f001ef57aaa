use crate::entities::{SsoConfig, SsoSession};
use crate::{Db, DbResult};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

fn row_to_sso_config(row: &PgRow) -> sqlx::Result<SsoConfig> {
    Ok(SsoConfig {
        customer_id: row.try_get("customer_id")?,
        entry_point: row.try_get("entry_point")?,
        issuer: row.try_get("issuer")?,
        idp_certificate: row.try_get("idp_certificate")?,
        acs_url: row.try_get("acs_url")?,
        logout_url: row.try_get("logout_url")?,
        name_id_format: row.try_get("name_id_format")?,
        signing_enabled: row.try_get("signing_enabled")?,
        attribute_mapping: row.try_get("attribute_mapping")?,
    })
}

fn row_to_sso_session(row: &PgRow) -> sqlx::Result<SsoSession> {
    Ok(SsoSession {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        upstream_user_id: row.try_get("upstream_user_id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        jwt: row.try_get("jwt")?,
        name_id: row.try_get("name_id")?,
        session_index: row.try_get("session_index")?,
        ip: row.try_get("ip")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        last_activity: row.try_get("last_activity")?,
    })
}

impl Db {
    pub async fn get_sso_config(&self, customer_id: Uuid) -> DbResult<SsoConfig> {
        let row = sqlx::query("SELECT * FROM sso_configs WHERE customer_id = $1")
            .bind(customer_id)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_sso_config(&row)?)
    }

    pub async fn upsert_sso_config(&self, config: &SsoConfig) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO sso_configs
                 (customer_id, entry_point, issuer, idp_certificate, acs_url, logout_url,
                  name_id_format, signing_enabled, attribute_mapping)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
               ON CONFLICT (customer_id) DO UPDATE SET
                 entry_point = EXCLUDED.entry_point,
                 issuer = EXCLUDED.issuer,
                 idp_certificate = EXCLUDED.idp_certificate,
                 acs_url = EXCLUDED.acs_url,
                 logout_url = EXCLUDED.logout_url,
                 name_id_format = EXCLUDED.name_id_format,
                 signing_enabled = EXCLUDED.signing_enabled,
                 attribute_mapping = EXCLUDED.attribute_mapping"#,
        )
        .bind(config.customer_id)
        .bind(&config.entry_point)
        .bind(&config.issuer)
        .bind(&config.idp_certificate)
        .bind(&config.acs_url)
        .bind(&config.logout_url)
        .bind(&config.name_id_format)
        .bind(config.signing_enabled)
        .bind(&config.attribute_mapping)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn create_sso_session(
        &self,
        customer_id: Uuid,
        upstream_user_id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        jwt: &str,
        name_id: &str,
        session_index: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> DbResult<SsoSession> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"INSERT INTO sso_sessions
                 (id, customer_id, upstream_user_id, email, display_name, jwt, name_id,
                  session_index, ip, user_agent, expires_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
               RETURNING *"#,
        )
        .bind(id)
        .bind(customer_id)
        .bind(upstream_user_id)
        .bind(email)
        .bind(display_name)
        .bind(jwt)
        .bind(name_id)
        .bind(session_index)
        .bind(ip)
        .bind(user_agent)
        .bind(expires_at)
        .fetch_one(self.pool())
        .await?;
        Ok(row_to_sso_session(&row)?)
    }

    pub async fn get_sso_session_by_jwt(&self, jwt: &str) -> DbResult<SsoSession> {
        let row = sqlx::query("SELECT * FROM sso_sessions WHERE jwt = $1")
            .bind(jwt)
            .fetch_one(self.pool())
            .await?;
        Ok(row_to_sso_session(&row)?)
    }

    pub async fn touch_sso_session_activity(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("UPDATE sso_sessions SET last_activity = now() WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_sso_session(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM sso_sessions WHERE id = $1").bind(id).execute(self.pool()).await?;
        Ok(())
    }

    /// Deletes every session whose `expires_at` is in the past; returns how
    /// many rows were swept, for the hourly session-sweep worker to log.
    pub async fn sweep_expired_sso_sessions(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sso_sessions WHERE expires_at < now()")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
