use crate::entities::{Credential, CredentialAudit, CredentialAuditKind, CredentialOwner, CredentialType, TestStatus};
use crate::{Db, DbResult};
use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgRow, Executor, Postgres, Row, Transaction};
use uuid::Uuid;

fn row_to_credential(row: &PgRow) -> sqlx::Result<Credential> {
    let credential_type_raw: String = row.try_get("credential_type")?;
    let test_status_raw: String = row.try_get("last_test_status")?;
    let owner_customer: Option<Uuid> = row.try_get("owner_customer_id")?;
    let owner_si: Option<Uuid> = row.try_get("owner_si_id")?;
    let owner = match (owner_customer, owner_si) {
        (Some(c), _) => CredentialOwner::Customer(c),
        (_, Some(si)) => CredentialOwner::ServiceIntegrator(si),
        _ => CredentialOwner::Customer(Uuid::nil()),
    };
    Ok(Credential {
        id: row.try_get("id")?,
        owner,
        service_type: row.try_get("service_type")?,
        credential_type: CredentialType::parse(&credential_type_raw).unwrap_or(CredentialType::ApiToken),
        access_token_enc: row.try_get("access_token_enc")?,
        refresh_token_enc: row.try_get("refresh_token_enc")?,
        api_token_enc: row.try_get("api_token_enc")?,
        password_enc: row.try_get("password_enc")?,
        base_url: row.try_get("base_url")?,
        username_or_email: row.try_get("username_or_email")?,
        client_id: row.try_get("client_id")?,
        scope: row.try_get("scope")?,
        token_type: row.try_get("token_type")?,
        expires_at: row.try_get("expires_at")?,
        enabled: row.try_get("enabled")?,
        last_test_status: match test_status_raw.as_str() {
            "success" => TestStatus::Success,
            "failed" => TestStatus::Failed,
            _ => TestStatus::Untested,
        },
        last_test_message: row.try_get("last_test_message")?,
        last_used: row.try_get("last_used")?,
        last_refreshed: row.try_get("last_refreshed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn owner_columns(owner: CredentialOwner) -> (Option<Uuid>, Option<Uuid>) {
    match owner {
        CredentialOwner::Customer(id) => (Some(id), None),
        CredentialOwner::ServiceIntegrator(id) => (None, Some(id)),
    }
}

pub struct NewCredential<'a> {
    pub owner: CredentialOwner,
    pub service_type: &'a str,
    pub credential_type: CredentialType,
    pub access_token_enc: Option<String>,
    pub refresh_token_enc: Option<String>,
    pub api_token_enc: Option<String>,
    pub password_enc: Option<String>,
    pub base_url: Option<String>,
    pub username_or_email: Option<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Db {
    /// Inserts the credential row inside `tx` — callers pair this with
    /// [`append_credential_audit`](Db::append_credential_audit) in the same
    /// transaction and commit once, per `§4.4`'s "write + audit" bundle.
    pub async fn create_credential(&self, tx: &mut Transaction<'_, Postgres>, c: NewCredential<'_>) -> DbResult<Credential> {
        let id = Uuid::new_v4();
        let (owner_customer_id, owner_si_id) = owner_columns(c.owner);
        let row = sqlx::query(
            r#"INSERT INTO credentials
                 (id, owner_customer_id, owner_si_id, service_type, credential_type,
                  access_token_enc, refresh_token_enc, api_token_enc, password_enc,
                  base_url, username_or_email, client_id, scope, token_type, expires_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
               RETURNING *"#,
        )
        .bind(id)
        .bind(owner_customer_id)
        .bind(owner_si_id)
        .bind(c.service_type)
        .bind(c.credential_type.as_str())
        .bind(c.access_token_enc)
        .bind(c.refresh_token_enc)
        .bind(c.api_token_enc)
        .bind(c.password_enc)
        .bind(c.base_url)
        .bind(c.username_or_email)
        .bind(c.client_id)
        .bind(c.scope)
        .bind(c.token_type)
        .bind(c.expires_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row_to_credential(&row)?)
    }

    pub async fn get_credential(&self, owner: CredentialOwner, service_type: &str) -> DbResult<Credential> {
        let (owner_customer_id, owner_si_id) = owner_columns(owner);
        let row = sqlx::query(
            "SELECT * FROM credentials WHERE owner_customer_id IS NOT DISTINCT FROM $1 AND owner_si_id IS NOT DISTINCT FROM $2 AND service_type = $3",
        )
        .bind(owner_customer_id)
        .bind(owner_si_id)
        .bind(service_type)
        .fetch_one(self.pool())
        .await?;
        Ok(row_to_credential(&row)?)
    }

    pub async fn list_credentials(&self, owner: CredentialOwner) -> DbResult<Vec<Credential>> {
        let (owner_customer_id, owner_si_id) = owner_columns(owner);
        let rows = sqlx::query(
            "SELECT * FROM credentials WHERE owner_customer_id IS NOT DISTINCT FROM $1 AND owner_si_id IS NOT DISTINCT FROM $2 ORDER BY service_type",
        )
        .bind(owner_customer_id)
        .bind(owner_si_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_credential).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    pub async fn update_credential_secrets(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        access_token_enc: Option<String>,
        refresh_token_enc: Option<String>,
        api_token_enc: Option<String>,
        password_enc: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"UPDATE credentials SET
                 access_token_enc = COALESCE($1, access_token_enc),
                 refresh_token_enc = COALESCE($2, refresh_token_enc),
                 api_token_enc = COALESCE($3, api_token_enc),
                 password_enc = COALESCE($4, password_enc),
                 expires_at = COALESCE($5, expires_at),
                 updated_at = now()
               WHERE id = $6"#,
        )
        .bind(access_token_enc)
        .bind(refresh_token_enc)
        .bind(api_token_enc)
        .bind(password_enc)
        .bind(expires_at)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn mark_refreshed(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> DbResult<()> {
        sqlx::query("UPDATE credentials SET last_refreshed = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn disable_credential(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> DbResult<()> {
        sqlx::query("UPDATE credentials SET enabled = false, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn touch_last_used(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> DbResult<()> {
        sqlx::query("UPDATE credentials SET last_used = now() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn record_test_result(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid, success: bool, message: Option<&str>) -> DbResult<()> {
        sqlx::query("UPDATE credentials SET last_test_status = $1, last_test_message = $2, updated_at = now() WHERE id = $3")
            .bind(if success { "success" } else { "failed" })
            .bind(message)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn delete_credential(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM credentials WHERE id = $1").bind(id).execute(&mut **tx).await?;
        Ok(())
    }

    /// OAuth2 credentials expiring within `within` whose refresh token is
    /// present and which are still enabled — the expiring-token sweep's
    /// candidate set (`§4.6`).
    pub async fn get_expiring_credentials(&self, within: Duration) -> DbResult<Vec<Credential>> {
        let cutoff = Utc::now() + within;
        let rows = sqlx::query(
            r#"SELECT * FROM credentials
               WHERE credential_type = 'oauth2'
                 AND enabled = true
                 AND refresh_token_enc IS NOT NULL
                 AND expires_at IS NOT NULL
                 AND expires_at < $1"#,
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_credential).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    /// Generic over the executor (a bare pool or a transaction's
    /// connection), the same way `repo_connection::append_event` is — so it
    /// can be the last statement inside the caller's transaction.
    pub async fn append_credential_audit<'e, E>(
        &self,
        executor: E,
        credential_id: Uuid,
        event: CredentialAuditKind,
        success: bool,
        error_message: Option<&str>,
    ) -> DbResult<CredentialAudit>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"INSERT INTO credential_audits (id, credential_id, event, success, error_message)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING *"#,
        )
        .bind(id)
        .bind(credential_id)
        .bind(event.as_str())
        .bind(success)
        .bind(error_message)
        .fetch_one(executor)
        .await?;
        Ok(CredentialAudit {
            id: row.try_get("id")?,
            credential_id: row.try_get("credential_id")?,
            event,
            success: row.try_get("success")?,
            error_message: row.try_get("error_message")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}
