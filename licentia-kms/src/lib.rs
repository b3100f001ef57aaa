//! Per-record envelope encryption with a local-key fallback.
//!
//! The cloud KMS call itself is behind the [`KmsClient`] trait — a real
//! GCP/AWS client is an external collaborator out of this core's scope, but
//! the envelope framing, fallback behavior, and error taxonomy below are
//! fully implemented so the vault can be exercised end to end against the
//! [`StubKmsClient`].

use async_trait::async_trait;
use licentia_crypto::{self as crypto, CiphertextBlob, CryptoError, KEY_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("kms unavailable")]
    Unavailable,
    #[error("kms transient failure: {0}")]
    Transient(String),
    #[error("kms decrypt failed")]
    DecryptFailed,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Cipher(#[from] CryptoError),
    #[error("kms transient failure, retry: {0}")]
    KmsTransient(String),
    #[error("credential unreadable: kms unwrap failed")]
    CredentialUnreadable,
}

/// Boundary to the external key-management service. A real implementation
/// calls out to GCP/AWS KMS; [`StubKmsClient`] stands in for it here.
#[async_trait]
pub trait KmsClient: Send + Sync {
    async fn wrap_dek(&self, dek: &[u8; KEY_LEN]) -> Result<Vec<u8>, KmsError>;
    async fn unwrap_dek(&self, wrapped: &[u8]) -> Result<[u8; KEY_LEN], KmsError>;
}

/// A deterministic local stand-in for a cloud KMS, keyed by the configured
/// project id. Wraps a DEK by XOR-ing it with a key derived via HMAC from
/// the project id, which is reversible and round-trips, without talking to
/// any external service.
pub struct StubKmsClient {
    mask: [u8; KEY_LEN],
}

impl StubKmsClient {
    pub fn new(project_id: &str, master_secret: &[u8]) -> Self {
        let mask = crypto::hmac_sha256(project_id.as_bytes(), master_secret);
        Self { mask }
    }

    fn xor_mask(&self, data: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        for i in 0..KEY_LEN {
            out[i] = data[i] ^ self.mask[i];
        }
        out
    }
}

#[async_trait]
impl KmsClient for StubKmsClient {
    async fn wrap_dek(&self, dek: &[u8; KEY_LEN]) -> Result<Vec<u8>, KmsError> {
        Ok(self.xor_mask(dek).to_vec())
    }

    async fn unwrap_dek(&self, wrapped: &[u8]) -> Result<[u8; KEY_LEN], KmsError> {
        if wrapped.len() != KEY_LEN {
            return Err(KmsError::DecryptFailed);
        }
        let mut buf = [0u8; KEY_LEN];
        buf.copy_from_slice(wrapped);
        Ok(self.xor_mask(&buf))
    }
}

/// Envelope-encryption front door used by the credential vault.
///
/// `kms` is `None` when the startup probe found no project id configured,
/// or when that probe failed — in either case the service downgrades to
/// local-only for the remainder of the process, per the spec's
/// `KmsUnavailable` failure mode.
pub struct EnvelopeService {
    local_key: [u8; KEY_LEN],
    kms: Option<Arc<dyn KmsClient>>,
}

impl EnvelopeService {
    pub fn new(local_key: [u8; KEY_LEN], kms: Option<Arc<dyn KmsClient>>) -> Self {
        Self { local_key, kms }
    }

    /// Probes for KMS availability the way `§4.2` describes: presence of a
    /// project identifier in configuration. The probe itself is a
    /// lightweight round trip (wrap-and-unwrap a throwaway DEK); any
    /// failure downgrades to local-only for the life of the service.
    pub async fn probe(local_key: [u8; KEY_LEN], candidate: Option<Arc<dyn KmsClient>>) -> Self {
        let kms = match candidate {
            None => None,
            Some(client) => {
                let probe_dek = [0u8; KEY_LEN];
                match client.wrap_dek(&probe_dek).await {
                    Ok(wrapped) => match client.unwrap_dek(&wrapped).await {
                        Ok(_) => Some(client),
                        Err(e) => {
                            warn!(error = %e, "kms probe unwrap failed, falling back to local key");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "kms probe wrap failed, falling back to local key");
                        None
                    }
                }
            }
        };
        Self { local_key, kms }
    }

    pub fn kms_enabled(&self) -> bool {
        self.kms.is_some()
    }

    /// Encrypts `plaintext`, producing a local (3-part) blob if KMS is
    /// disabled, or a 4-part envelope blob otherwise.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<String, EnvelopeError> {
        let Some(kms) = &self.kms else {
            return Ok(crypto::encrypt_with_key(plaintext, &self.local_key)?);
        };

        let mut dek = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut dek)
            .map_err(|_| EnvelopeError::KmsTransient("rng failure".into()))?;

        let wrapped = match kms.wrap_dek(&dek).await {
            Ok(w) => w,
            Err(e) => {
                dek = [0u8; KEY_LEN];
                return Err(EnvelopeError::KmsTransient(e.to_string()));
            }
        };

        let local_blob = crypto::encrypt_with_key(plaintext, &dek);
        dek = [0u8; KEY_LEN];
        let local_blob = local_blob?;

        Ok(format!("{}:{}", crypto::hex_encode(&wrapped), local_blob))
    }

    /// Decrypts either blob shape. A 4-part blob with KMS currently
    /// disabled, or whose DEK fails to unwrap, surfaces as
    /// [`EnvelopeError::CredentialUnreadable`] — fatal to that one record,
    /// not the whole read path.
    pub async fn decrypt(&self, blob: &str) -> Result<Vec<u8>, EnvelopeError> {
        match crypto::sniff_blob(blob)? {
            CiphertextBlob::Local { iv, tag, ct } => {
                Ok(crypto::decrypt_local_parts(&iv, &tag, &ct, &self.local_key)?)
            }
            CiphertextBlob::Envelope { wrapped_dek, iv, tag, ct } => {
                let kms = self.kms.as_ref().ok_or(EnvelopeError::CredentialUnreadable)?;
                let mut dek = kms
                    .unwrap_dek(&wrapped_dek)
                    .await
                    .map_err(|_| EnvelopeError::CredentialUnreadable)?;
                let plaintext = crypto::decrypt_local_parts(&iv, &tag, &ct, &dek);
                dek = [0u8; KEY_LEN];
                let _ = dek;
                plaintext.map_err(EnvelopeError::from)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_key() -> [u8; KEY_LEN] {
        crypto::normalize_key_material(b"test-local-key-material-32bytes!")
    }

    #[tokio::test]
    async fn local_only_round_trip_when_kms_disabled() {
        let svc = EnvelopeService::new(local_key(), None);
        let blob = svc.encrypt(b"jira-token").await.unwrap();
        assert_eq!(blob.split(':').count(), 3);
        let plain = svc.decrypt(&blob).await.unwrap();
        assert_eq!(plain, b"jira-token");
    }

    #[tokio::test]
    async fn envelope_round_trip_when_kms_enabled() {
        let client: Arc<dyn KmsClient> = Arc::new(StubKmsClient::new("proj-1", b"master-secret"));
        let svc = EnvelopeService::probe(local_key(), Some(client)).await;
        assert!(svc.kms_enabled());

        let blob = svc.encrypt(b"azure-pat").await.unwrap();
        assert_eq!(blob.split(':').count(), 4);
        let plain = svc.decrypt(&blob).await.unwrap();
        assert_eq!(plain, b"azure-pat");
    }

    #[tokio::test]
    async fn envelope_blob_unreadable_without_kms() {
        let client: Arc<dyn KmsClient> = Arc::new(StubKmsClient::new("proj-1", b"master-secret"));
        let svc = EnvelopeService::probe(local_key(), Some(client)).await;
        let blob = svc.encrypt(b"secret").await.unwrap();

        let downgraded = EnvelopeService::new(local_key(), None);
        let err = downgraded.decrypt(&blob).await.unwrap_err();
        assert!(matches!(err, EnvelopeError::CredentialUnreadable));
    }
}
