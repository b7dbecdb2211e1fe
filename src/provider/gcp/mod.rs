//! # GCP REST Providers
//!
//! Native REST implementations of the provider capabilities:
//!
//! - [`StorageREST`]: Cloud Storage JSON API v1 ([`BlobStore`](super::BlobStore))
//! - [`KmsREST`]: Cloud KMS v1 ([`KeyManagement`](super::KeyManagement))
//! - [`SecretManagerREST`]: Secret Manager v1 ([`SecretRegister`](super::SecretRegister))
//!
//! All three share one [`RestTransport`] holding the HTTP client and bearer
//! token. Endpoints are configurable so the clients work directly against
//! Pact mock servers.
//!
//! References:
//! - [Cloud Storage JSON API](https://cloud.google.com/storage/docs/json_api/v1)
//! - [Cloud KMS REST API](https://cloud.google.com/kms/docs/reference/rest)
//! - [Secret Manager REST API](https://cloud.google.com/secret-manager/docs/reference/rest)

mod common;
mod kms;
mod secret_manager;
mod storage;
mod transport;

pub use kms::KmsREST;
pub use secret_manager::SecretManagerREST;
pub use storage::StorageREST;
pub use transport::RestTransport;
