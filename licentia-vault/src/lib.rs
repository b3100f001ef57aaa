//! Envelope-encrypted credential vault: CRUD over third-party credentials,
//! access auditing, and the expiring-OAuth2-token sweep (`SPEC_FULL.md`
//! §4.6).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use licentia_db::entities::{
    Credential, CredentialAuditKind, CredentialOwner, CredentialType, TestStatus,
};
use licentia_db::repo_credential::NewCredential;
use licentia_db::{Db, DbError};
use licentia_kms::{EnvelopeError, EnvelopeService};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Storage(#[from] DbError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// A secret value as exposed across the vault's public DTOs. Replaces the
/// `"[ENCRYPTED]"` sentinel string: `list()` yields `Redacted`/`Absent`,
/// `get()` yields `Present` with the decrypted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretField {
    Present(String),
    Redacted,
    Absent,
}

impl SecretField {
    fn from_ciphertext(enc: &Option<String>) -> Self {
        match enc {
            Some(_) => SecretField::Redacted,
            None => SecretField::Absent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialView {
    pub id: Uuid,
    pub owner: CredentialOwner,
    pub service_type: String,
    pub credential_type: CredentialType,
    pub access_token: SecretField,
    pub refresh_token: SecretField,
    pub api_token: SecretField,
    pub password: SecretField,
    pub base_url: Option<String>,
    pub username_or_email: Option<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub last_test_status: TestStatus,
    pub last_test_message: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl CredentialView {
    fn redacted(c: &Credential) -> Self {
        Self {
            id: c.id,
            owner: c.owner,
            service_type: c.service_type.clone(),
            credential_type: c.credential_type,
            access_token: SecretField::from_ciphertext(&c.access_token_enc),
            refresh_token: SecretField::from_ciphertext(&c.refresh_token_enc),
            api_token: SecretField::from_ciphertext(&c.api_token_enc),
            password: SecretField::from_ciphertext(&c.password_enc),
            base_url: c.base_url.clone(),
            username_or_email: c.username_or_email.clone(),
            client_id: c.client_id.clone(),
            scope: c.scope.clone(),
            token_type: c.token_type.clone(),
            expires_at: c.expires_at,
            enabled: c.enabled,
            last_test_status: c.last_test_status,
            last_test_message: c.last_test_message.clone(),
            last_used: c.last_used,
            last_refreshed: c.last_refreshed,
        }
    }
}

/// Plaintext secrets supplied on `create`/`update`. `None` leaves the
/// existing stored value untouched on update.
#[derive(Debug, Default)]
pub struct SecretInput {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub api_token: Option<String>,
    pub password: Option<String>,
}

pub struct NewCredentialInput<'a> {
    pub owner: CredentialOwner,
    pub service_type: &'a str,
    pub credential_type: CredentialType,
    pub secrets: SecretInput,
    pub base_url: Option<String>,
    pub username_or_email: Option<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of a per-service refresh attempt, returned by a
/// [`CredentialRefresher`].
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    /// Provider returned 401/403: the credential should be disabled.
    #[error("refresh rejected by provider")]
    Unauthorized,
    #[error("transient refresh failure: {0}")]
    Transient(String),
}

/// Per-service OAuth2 refresh contract. The core defines this boundary and
/// a test double; real Jira/Azure/etc. refreshers live outside this crate.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, view: &CredentialView, refresh_token: &str) -> Result<RefreshedTokens, RefreshError>;
}

pub struct Vault {
    db: Arc<Db>,
    envelope: Arc<EnvelopeService>,
}

impl Vault {
    pub fn new(db: Arc<Db>, envelope: Arc<EnvelopeService>) -> Self {
        Self { db, envelope }
    }

    pub async fn create(&self, input: NewCredentialInput<'_>) -> Result<CredentialView, VaultError> {
        let access_token_enc = self.encrypt_opt(input.secrets.access_token.as_deref()).await?;
        let refresh_token_enc = self.encrypt_opt(input.secrets.refresh_token.as_deref()).await?;
        let api_token_enc = self.encrypt_opt(input.secrets.api_token.as_deref()).await?;
        let password_enc = self.encrypt_opt(input.secrets.password.as_deref()).await?;

        let mut tx = self.db.begin().await?;
        let created = self
            .db
            .create_credential(
                &mut tx,
                NewCredential {
                    owner: input.owner,
                    service_type: input.service_type,
                    credential_type: input.credential_type,
                    access_token_enc,
                    refresh_token_enc,
                    api_token_enc,
                    password_enc,
                    base_url: input.base_url,
                    username_or_email: input.username_or_email,
                    client_id: input.client_id,
                    scope: input.scope,
                    token_type: input.token_type,
                    expires_at: input.expires_at,
                },
            )
            .await?;

        self.db.append_credential_audit(&mut *tx, created.id, CredentialAuditKind::Created, true, None).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(CredentialView::redacted(&created))
    }

    /// Decrypts every present secret, bumps `lastUsed`, and appends an
    /// `accessed` audit row — audit fires on actual secret exposure. The
    /// bump and the audit row commit together; if either fails neither
    /// lands.
    pub async fn get(&self, owner: CredentialOwner, service_type: &str) -> Result<CredentialView, VaultError> {
        let c = self.db.get_credential(owner, service_type).await?;

        let mut view = CredentialView::redacted(&c);
        view.access_token = self.decrypt_field(&c.access_token_enc).await?;
        view.refresh_token = self.decrypt_field(&c.refresh_token_enc).await?;
        view.api_token = self.decrypt_field(&c.api_token_enc).await?;
        view.password = self.decrypt_field(&c.password_enc).await?;

        let mut tx = self.db.begin().await?;
        self.db.touch_last_used(&mut tx, c.id).await?;
        self.db.append_credential_audit(&mut *tx, c.id, CredentialAuditKind::Accessed, true, None).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(view)
    }

    /// Secrets come back `Redacted`/`Absent`, never decrypted; no audit row.
    pub async fn list(&self, owner: CredentialOwner) -> Result<Vec<CredentialView>, VaultError> {
        let rows = self.db.list_credentials(owner).await?;
        Ok(rows.iter().map(CredentialView::redacted).collect())
    }

    pub async fn update(&self, id: Uuid, secrets: SecretInput, expires_at: Option<DateTime<Utc>>) -> Result<(), VaultError> {
        let access_token_enc = self.encrypt_opt(secrets.access_token.as_deref()).await?;
        let refresh_token_enc = self.encrypt_opt(secrets.refresh_token.as_deref()).await?;
        let api_token_enc = self.encrypt_opt(secrets.api_token.as_deref()).await?;
        let password_enc = self.encrypt_opt(secrets.password.as_deref()).await?;

        let mut tx = self.db.begin().await?;
        self.db
            .update_credential_secrets(&mut tx, id, access_token_enc, refresh_token_enc, api_token_enc, password_enc, expires_at)
            .await?;
        self.db.append_credential_audit(&mut *tx, id, CredentialAuditKind::Updated, true, None).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), VaultError> {
        let mut tx = self.db.begin().await?;
        self.db.append_credential_audit(&mut *tx, id, CredentialAuditKind::Deleted, true, None).await?;
        self.db.delete_credential(&mut tx, id).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    /// Records only the out-of-band prober's result; never speaks to the
    /// third-party service itself.
    pub async fn record_test(&self, id: Uuid, success: bool, message: Option<&str>) -> Result<(), VaultError> {
        let mut tx = self.db.begin().await?;
        self.db.record_test_result(&mut tx, id, success, message).await?;
        self.db.append_credential_audit(&mut *tx, id, CredentialAuditKind::Tested, success, message).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    /// The 5-minute expiring-token sweep: finds OAuth2 credentials expiring
    /// within `within` and refreshes each via `refresher`.
    pub async fn refresh_expiring(
        &self,
        within: Duration,
        refresher: &dyn CredentialRefresher,
    ) -> Result<usize, VaultError> {
        let expiring = self.db.get_expiring_credentials(within).await?;
        let mut refreshed = 0;

        for c in &expiring {
            let Some(refresh_token_enc) = &c.refresh_token_enc else { continue };
            let plaintext_refresh = match self.envelope.decrypt(refresh_token_enc).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(credential_id = %c.id, error = %e, "could not decrypt refresh token for sweep");
                    continue;
                }
            };

            let view = CredentialView::redacted(c);
            match refresher.refresh(&view, &plaintext_refresh).await {
                Ok(tokens) => {
                    let access_enc = Some(self.envelope.encrypt(tokens.access_token.as_bytes()).await?);
                    let refresh_enc = match &tokens.refresh_token {
                        Some(rt) => Some(self.envelope.encrypt(rt.as_bytes()).await?),
                        None => None,
                    };
                    let mut tx = self.db.begin().await?;
                    self.db
                        .update_credential_secrets(&mut tx, c.id, access_enc, refresh_enc, None, None, tokens.expires_at)
                        .await?;
                    self.db.mark_refreshed(&mut tx, c.id).await?;
                    self.db.append_credential_audit(&mut *tx, c.id, CredentialAuditKind::Refreshed, true, None).await?;
                    tx.commit().await.map_err(DbError::from)?;
                    refreshed += 1;
                }
                Err(RefreshError::Unauthorized) => {
                    let mut tx = self.db.begin().await?;
                    self.db.disable_credential(&mut tx, c.id).await?;
                    self.db
                        .append_credential_audit(&mut *tx, c.id, CredentialAuditKind::Refreshed, false, Some("unauthorized"))
                        .await?;
                    tx.commit().await.map_err(DbError::from)?;
                }
                Err(RefreshError::Transient(msg)) => {
                    warn!(credential_id = %c.id, error = %msg, "transient refresh failure, will retry next sweep");
                }
            }
        }

        Ok(refreshed)
    }

    async fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, VaultError> {
        match plaintext {
            Some(p) => Ok(Some(self.envelope.encrypt(p.as_bytes()).await?)),
            None => Ok(None),
        }
    }

    async fn decrypt_field(&self, enc: &Option<String>) -> Result<SecretField, VaultError> {
        match enc {
            Some(blob) => {
                let bytes = self.envelope.decrypt(blob).await?;
                Ok(SecretField::Present(String::from_utf8_lossy(&bytes).into_owned()))
            }
            None => Ok(SecretField::Absent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_field_from_ciphertext_reflects_presence() {
        assert_eq!(SecretField::from_ciphertext(&Some("a:b:c".into())), SecretField::Redacted);
        assert_eq!(SecretField::from_ciphertext(&None), SecretField::Absent);
    }
}
