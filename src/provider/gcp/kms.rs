//! Cloud KMS v1 REST client
//!
//! Only symmetric `ENCRYPT_DECRYPT` keys are used. Key names passed in are
//! crypto key resource names; a trailing `/cryptoKeyVersions/N` is accepted
//! for decrypt and policy calls alike because KMS picks the primary version
//! on encrypt anyway.
//!
//! References:
//! - [cryptoKeys.encrypt](https://cloud.google.com/kms/docs/reference/rest/v1/projects.locations.keyRings.cryptoKeys/encrypt)
//! - [cryptoKeys.decrypt](https://cloud.google.com/kms/docs/reference/rest/v1/projects.locations.keyRings.cryptoKeys/decrypt)

use super::common::join_url;
use super::transport::RestTransport;
use crate::context::Context;
use crate::crypto::trim_key_version;
use crate::provider::{ApiError, KeyManagement, Policy, PolicyJson};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug_span, Instrument};

const SERVICE: &str = "kms";

// ============================================================================
// Request/Response Structures
// ============================================================================

/// Request body for `cryptoKeys.encrypt`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptRequest {
    /// Base64-encoded plaintext
    plaintext: String,
    /// Base64-encoded additional authenticated data
    additional_authenticated_data: String,
}

/// Response body for `cryptoKeys.encrypt`
#[derive(Debug, Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

/// Request body for `cryptoKeys.decrypt`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest {
    ciphertext: String,
    additional_authenticated_data: String,
}

/// Response body for `cryptoKeys.decrypt`
#[derive(Debug, Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Debug, Serialize)]
struct SetIamPolicyRequest {
    policy: PolicyJson,
}

/// Cloud KMS REST client
#[derive(Clone)]
pub struct KmsREST {
    transport: RestTransport,
    base_url: String,
}

impl std::fmt::Debug for KmsREST {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsREST")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl KmsREST {
    #[must_use]
    pub fn new(transport: RestTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    fn key_url(&self, key: &str, verb: &str) -> Result<url::Url, ApiError> {
        join_url(
            SERVICE,
            &self.base_url,
            &format!("v1/{}:{verb}", trim_key_version(key)),
        )
    }
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|e| ApiError::Decode {
            service: SERVICE,
            message: format!("{field} is not valid base64: {e}"),
        })
}

#[async_trait]
impl KeyManagement for KmsREST {
    async fn encrypt(
        &self,
        _ctx: &Context,
        key: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ApiError> {
        let span = debug_span!("gcp.kms.encrypt", key);
        async move {
            let request = self
                .transport
                .request(Method::POST, self.key_url(key, "encrypt")?)
                .json(&EncryptRequest {
                    plaintext: general_purpose::STANDARD.encode(plaintext),
                    additional_authenticated_data: general_purpose::STANDARD.encode(aad),
                });
            let response: EncryptResponse =
                self.transport.json(SERVICE, "cryptoKeys.encrypt", request).await?;
            decode_b64("ciphertext", &response.ciphertext)
        }
        .instrument(span)
        .await
    }

    async fn decrypt(
        &self,
        _ctx: &Context,
        key: &str,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ApiError> {
        let span = debug_span!("gcp.kms.decrypt", key);
        async move {
            let request = self
                .transport
                .request(Method::POST, self.key_url(key, "decrypt")?)
                .json(&DecryptRequest {
                    ciphertext: general_purpose::STANDARD.encode(ciphertext),
                    additional_authenticated_data: general_purpose::STANDARD.encode(aad),
                });
            let response: DecryptResponse =
                self.transport.json(SERVICE, "cryptoKeys.decrypt", request).await?;
            decode_b64("plaintext", &response.plaintext)
        }
        .instrument(span)
        .await
    }

    async fn get_key_policy(&self, _ctx: &Context, key: &str) -> Result<Policy, ApiError> {
        let request = self
            .transport
            .request(Method::GET, self.key_url(key, "getIamPolicy")?);
        let policy: PolicyJson = self
            .transport
            .json(SERVICE, "cryptoKeys.getIamPolicy", request)
            .await?;
        Ok(policy.into())
    }

    async fn set_key_policy(
        &self,
        _ctx: &Context,
        key: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        let request = self
            .transport
            .request(Method::POST, self.key_url(key, "setIamPolicy")?)
            .json(&SetIamPolicyRequest {
                policy: PolicyJson::from(policy),
            });
        let policy: PolicyJson = self
            .transport
            .json(SERVICE, "cryptoKeys.setIamPolicy", request)
            .await?;
        Ok(policy.into())
    }
}
