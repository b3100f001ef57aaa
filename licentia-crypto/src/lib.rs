//! AES-256-GCM encryption, HMAC-SHA256 checksums, and SHA-256 hashing.
//!
//! This crate owns the wire format for ciphertext blobs (`hex(iv):hex(tag):hex(ct)`
//! for the local format, `hex(dek):hex(iv):hex(tag):hex(ct)` for the KMS envelope
//! format) but not the envelope wrapping itself — that lives one layer up in
//! `licentia-kms`, which re-uses [`encrypt_with_key`] and [`decrypt_with_key`] to
//! do the local-DEK step of an envelope.

use ring::aead::{self, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM};
use ring::error::Unspecified;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext blob failed integrity check")]
    CipherIntegrity,
    #[error("random number generator failure")]
    Rng,
}

/// Right-pads a key shorter than 32 bytes with NUL, truncates one longer.
///
/// This is the documented footgun from the spec: production deployments are
/// expected to supply exactly 32 bytes. Isolated here so a stricter mode
/// (reject anything != 32 bytes) is a one-function change.
pub fn normalize_key_material(raw: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let n = raw.len().min(KEY_LEN);
    key[..n].copy_from_slice(&raw[..n]);
    key
}

struct SingleUse(Option<[u8; NONCE_LEN]>);

impl NonceSequence for SingleUse {
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        self.0.take().map(Nonce::assume_unique_for_key).ok_or(Unspecified)
    }
}

/// Encrypts `plaintext` under `key`, returning `hex(iv):hex(tag):hex(ct)`.
pub fn encrypt_with_key(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<String, CryptoError> {
    let rng = SystemRandom::new();
    let mut iv = [0u8; NONCE_LEN];
    rng.fill(&mut iv).map_err(|_| CryptoError::Rng)?;

    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::Rng)?;
    let mut sealing = SealingKey::new(unbound, SingleUse(Some(iv)));

    let mut in_out = plaintext.to_vec();
    let tag = sealing
        .seal_in_place_separate_tag(aead::Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Rng)?;

    Ok(format!(
        "{}:{}:{}",
        hex_encode(&iv),
        hex_encode(tag.as_ref()),
        hex_encode(&in_out)
    ))
}

/// Decrypts a local-format blob (`hex(iv):hex(tag):hex(ct)`) produced by [`encrypt_with_key`].
pub fn decrypt_with_key(blob: &str, key: &[u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    let (iv, tag, ct) = split_local(blob)?;
    decrypt_local_parts(&iv, &tag, &ct, key)
}

/// Decrypts already-split `(iv, tag, ct)` components, used by both the
/// local path here and the envelope path in `licentia-kms` (where the key
/// is a per-record DEK instead of the configured master key).
pub fn decrypt_local_parts(
    iv: &[u8],
    tag: &[u8],
    ct: &[u8],
    key: &[u8; KEY_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != NONCE_LEN || tag.len() != 16 {
        return Err(CryptoError::CipherIntegrity);
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(iv);

    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::CipherIntegrity)?;
    let mut opening = OpeningKey::new(unbound, SingleUse(Some(nonce)));

    let mut in_out = Vec::with_capacity(ct.len() + tag.len());
    in_out.extend_from_slice(ct);
    in_out.extend_from_slice(tag);

    let plaintext = opening
        .open_in_place(aead::Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::CipherIntegrity)?;
    Ok(plaintext.to_vec())
}

fn split_local(blob: &str) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), CryptoError> {
    let parts: Vec<&str> = blob.split(':').collect();
    if parts.len() != 3 {
        return Err(CryptoError::CipherIntegrity);
    }
    let iv = hex_decode(parts[0]).map_err(|_| CryptoError::CipherIntegrity)?;
    let tag = hex_decode(parts[1]).map_err(|_| CryptoError::CipherIntegrity)?;
    let ct = hex_decode(parts[2]).map_err(|_| CryptoError::CipherIntegrity)?;
    Ok((iv, tag, ct))
}

/// The two shapes a ciphertext column can take, sniffed by segment count.
pub enum CiphertextBlob {
    Local {
        iv: Vec<u8>,
        tag: Vec<u8>,
        ct: Vec<u8>,
    },
    Envelope {
        wrapped_dek: Vec<u8>,
        iv: Vec<u8>,
        tag: Vec<u8>,
        ct: Vec<u8>,
    },
}

/// Splits a stored blob into its local or envelope shape without decrypting it.
pub fn sniff_blob(blob: &str) -> Result<CiphertextBlob, CryptoError> {
    let parts: Vec<&str> = blob.split(':').collect();
    match parts.len() {
        3 => {
            let iv = hex_decode(parts[0]).map_err(|_| CryptoError::CipherIntegrity)?;
            let tag = hex_decode(parts[1]).map_err(|_| CryptoError::CipherIntegrity)?;
            let ct = hex_decode(parts[2]).map_err(|_| CryptoError::CipherIntegrity)?;
            Ok(CiphertextBlob::Local { iv, tag, ct })
        }
        4 => {
            let wrapped_dek = hex_decode(parts[0]).map_err(|_| CryptoError::CipherIntegrity)?;
            let iv = hex_decode(parts[1]).map_err(|_| CryptoError::CipherIntegrity)?;
            let tag = hex_decode(parts[2]).map_err(|_| CryptoError::CipherIntegrity)?;
            let ct = hex_decode(parts[3]).map_err(|_| CryptoError::CipherIntegrity)?;
            Ok(CiphertextBlob::Envelope { wrapped_dek, iv, tag, ct })
        }
        _ => Err(CryptoError::CipherIntegrity),
    }
}

/// HMAC-SHA256, used for license checksums.
pub fn hmac_sha256(data: &[u8], key: &[u8]) -> [u8; 32] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(tag.as_ref());
    out
}

/// Deterministic SHA-256 hasher, used for machine-id hashing and JWT-hash correlation.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    hex_encode(digest.as_ref())
}

pub fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub fn hex_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    if s.len() % 2 != 0 {
        return Err(CryptoError::CipherIntegrity);
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let hi = hex_nibble(bytes[i])?;
        let lo = hex_nibble(bytes[i + 1])?;
        out.push((hi << 4) | lo);
        i += 2;
    }
    Ok(out)
}

fn hex_nibble(b: u8) -> Result<u8, CryptoError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(CryptoError::CipherIntegrity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = normalize_key_material(b"0123456789abcdef0123456789abcdef");
        let blob = encrypt_with_key(b"hello world", &key).unwrap();
        assert_eq!(blob.split(':').count(), 3);
        let plain = decrypt_with_key(&blob, &key).unwrap();
        assert_eq!(plain, b"hello world");
    }

    #[test]
    fn tampered_tag_fails_integrity() {
        let key = normalize_key_material(b"key");
        let mut blob = encrypt_with_key(b"secret", &key).unwrap();
        let mut ch: Vec<char> = blob.chars().collect();
        let last = ch.len() - 1;
        ch[last] = if ch[last] == '0' { '1' } else { '0' };
        blob = ch.into_iter().collect();
        assert!(matches!(decrypt_with_key(&blob, &key), Err(CryptoError::CipherIntegrity)));
    }

    #[test]
    fn short_key_is_padded() {
        let key = normalize_key_material(b"short");
        assert_eq!(key.len(), KEY_LEN);
        assert_eq!(&key[5..], &[0u8; KEY_LEN - 5][..]);
    }

    #[test]
    fn long_key_is_truncated() {
        let raw = vec![7u8; 64];
        let key = normalize_key_material(&raw);
        assert_eq!(key, [7u8; KEY_LEN]);
    }

    #[test]
    fn malformed_blob_rejected() {
        assert!(matches!(sniff_blob("not-a-blob"), Err(CryptoError::CipherIntegrity)));
        assert!(matches!(sniff_blob("aa:bb"), Err(CryptoError::CipherIntegrity)));
    }

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256(b"base", b"secret");
        let b = hmac_sha256(b"base", b"secret");
        assert_eq!(a, b);
        let c = hmac_sha256(b"base", b"other-secret");
        assert_ne!(a, c);
    }
}
