//! # Envelope Encryption
//!
//! Secrets are encrypted locally with a random AES-256-GCM data encryption
//! key (DEK). The DEK is then wrapped by a remote key encryption key (KEK)
//! held in Cloud KMS, and only the wrapped form is persisted.
//!
//! Both the local AEAD and the KMS wrap bind the object name as additional
//! authenticated data, so ciphertext copied to another name fails to open.
//!
//! Stored layout: `base64(wrapped DEK) ":" base64(nonce || ciphertext)`
//! using the standard (padded) base64 alphabet.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::provider::KeyManagement;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

/// Size of a data encryption key in bytes (256 bits for AES-256)
pub const DEK_SIZE: usize = 32;

/// Size of an AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Separator between the wrapped DEK and the ciphertext
pub const ENVELOPE_SEPARATOR: char = ':';

/// A data encryption key, wiped on drop
pub type DataKey = Zeroizing<[u8; DEK_SIZE]>;

/// Generate a random data encryption key
#[must_use]
pub fn generate_dek() -> DataKey {
    let mut key = Zeroizing::new([0u8; DEK_SIZE]);
    OsRng.fill_bytes(key.as_mut());
    key
}

/// Encrypt `plaintext` under a fresh DEK, binding `aad`
///
/// Returns the DEK, which the caller must wrap and drop, and
/// `nonce || ciphertext`.
///
/// # Errors
/// Returns [`Error::InvalidRequest`] if the cipher rejects the input, which
/// AES-GCM only does for plaintexts beyond its length limit.
pub fn encrypt(plaintext: &[u8], aad: &[u8]) -> Result<(DataKey, Vec<u8>)> {
    let dek = generate_dek();
    let cipher = Aes256Gcm::new_from_slice(dek.as_slice())
        .map_err(|e| Error::InvalidRequest(format!("invalid data key: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::InvalidRequest(format!("encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok((dek, blob))
}

/// Decrypt `nonce || ciphertext` with `dek`, verifying `aad`
///
/// # Errors
/// - [`Error::MalformedCiphertext`] if `blob` is shorter than a nonce
/// - [`Error::DecryptionFailed`] on a wrong key, wrong AAD or tampering
pub fn decrypt(dek: &[u8], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE {
        return Err(Error::MalformedCiphertext(format!(
            "ciphertext is {} bytes, shorter than the {NONCE_SIZE} byte nonce",
            blob.len()
        )));
    }
    if dek.len() != DEK_SIZE {
        return Err(Error::DecryptionFailed(format!(
            "data key is {} bytes, expected {DEK_SIZE}",
            dek.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(dek)
        .map_err(|e| Error::DecryptionFailed(format!("invalid data key: {e}")))?;
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| Error::DecryptionFailed(format!("message authentication failed: {e}")))
}

/// Parsed form of a stored secret object
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    /// DEK wrapped by the KEK
    pub wrapped_dek: Vec<u8>,
    /// `nonce || ciphertext`
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("wrapped_dek_len", &self.wrapped_dek.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl Envelope {
    /// Serialise to the stored `dek:ciphertext` form
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}{ENVELOPE_SEPARATOR}{}",
            general_purpose::STANDARD.encode(&self.wrapped_dek),
            general_purpose::STANDARD.encode(&self.ciphertext)
        )
    }

    /// Parse the stored form
    ///
    /// # Errors
    /// Returns [`Error::MalformedCiphertext`] if the separator is missing or
    /// either half is not valid base64.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::MalformedCiphertext(format!("not valid utf-8: {e}")))?;

        let Some((dek_part, ciphertext_part)) = text.split_once(ENVELOPE_SEPARATOR) else {
            return Err(Error::MalformedCiphertext("not enough parts".to_string()));
        };

        let wrapped_dek = general_purpose::STANDARD
            .decode(dek_part)
            .map_err(|e| Error::MalformedCiphertext(format!("failed to parse dek: {e}")))?;
        let ciphertext = general_purpose::STANDARD
            .decode(ciphertext_part)
            .map_err(|e| Error::MalformedCiphertext(format!("failed to parse ciphertext: {e}")))?;

        Ok(Self {
            wrapped_dek,
            ciphertext,
        })
    }
}

/// Strip a trailing `/cryptoKeyVersions/N` from a KMS key name
///
/// `projects/p/locations/l/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1`
/// becomes `projects/p/locations/l/keyRings/r/cryptoKeys/k`.
#[must_use]
pub fn trim_key_version(key: &str) -> &str {
    match key.match_indices('/').nth(7) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

/// Wrap `dek` with the KEK named `key`, binding `aad`
///
/// # Errors
/// Returns [`Error::Api`] if KMS rejects the request.
pub async fn wrap_dek(
    kms: &dyn KeyManagement,
    ctx: &Context,
    key: &str,
    dek: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    debug!(key, "wrapping data key");
    kms.encrypt(ctx, key, dek, aad)
        .await
        .map_err(|e| Error::api("encrypt data key with", key, e))
}

/// Unwrap `wrapped` with the KEK named `key`, verifying `aad`
///
/// # Errors
/// Returns [`Error::DecryptionFailed`] when KMS rejects the ciphertext (wrong
/// key or AAD), [`Error::Api`] for any other KMS failure.
pub async fn unwrap_dek(
    kms: &dyn KeyManagement,
    ctx: &Context,
    key: &str,
    wrapped: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    debug!(key, "unwrapping data key");
    match kms.decrypt(ctx, key, wrapped, aad).await {
        Ok(dek) => Ok(Zeroizing::new(dek)),
        Err(e) if e.is_invalid_argument() => Err(Error::DecryptionFailed(format!(
            "kms rejected data key: {e}"
        ))),
        Err(e) => Err(Error::api("decrypt data key with", key, e)),
    }
}

/// Encrypt `plaintext` and wrap its DEK, producing a storable envelope
///
/// # Errors
/// Propagates [`wrap_dek`] failures.
pub async fn seal(
    kms: &dyn KeyManagement,
    ctx: &Context,
    key: &str,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Envelope> {
    let (dek, ciphertext) = encrypt(plaintext, aad)?;
    let wrapped_dek = wrap_dek(kms, ctx, key, dek.as_slice(), aad).await?;
    Ok(Envelope {
        wrapped_dek,
        ciphertext,
    })
}

/// Unwrap an envelope's DEK and decrypt its ciphertext
///
/// # Errors
/// Propagates [`unwrap_dek`] and [`decrypt`] failures.
pub async fn open(
    kms: &dyn KeyManagement,
    ctx: &Context,
    key: &str,
    envelope: &Envelope,
    aad: &[u8],
) -> Result<Vec<u8>> {
    let dek = unwrap_dek(kms, ctx, key, &envelope.wrapped_dek, aad).await?;
    decrypt(&dek, &envelope.ciphertext, aad)
}
