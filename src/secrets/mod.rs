//! # Secret Service
//!
//! [`Client`] orchestrates every secret operation across the two backends:
//!
//! - **Storage**: envelope-encrypted objects in Cloud Storage, with the data
//!   key wrapped by Cloud KMS and generation/metageneration preconditions
//! - **Secret Manager**: an append-only register that encrypts on its own
//!
//! Each operation takes a closed request enum with one variant per backend
//! and dispatches on it with a single `match`.
//!
//! ## Operations
//!
//! | Operation | Module |
//! |-----------|--------|
//! | `create` | [`create`] |
//! | `read`, `access` | [`read`] |
//! | `update` | [`update`] |
//! | `delete` | [`delete`] |
//! | `list` | [`list`] |
//! | `grant`, `revoke` | [`iam`] |
//! | `migrate`, `migrate_bucket` | [`migrate`] |

pub mod create;
pub mod delete;
pub mod iam;
pub mod list;
pub mod migrate;
pub mod read;
pub mod update;

pub use create::CreateRequest;
pub use delete::DeleteRequest;
pub use iam::{GrantRequest, RevokeRequest};
pub use list::{ListRequest, ListResponse};
pub use migrate::{MigrateBucketRequest, MigrateReport, MigrateRequest};
pub use read::{AccessRequest, ReadRequest};
pub use update::UpdateRequest;

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::provider::gcp::{KmsREST, RestTransport, SecretManagerREST, StorageREST};
use crate::provider::{
    ApiError, BlobStore, KeyManagement, ObjectAttrs, RegisterVersion, Replication, SecretRegister,
};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{field, info, info_span, Span};

/// Backend label used in spans and metrics
pub(crate) const STORAGE_BACKEND: &str = "storage";
pub(crate) const SECRET_MANAGER_BACKEND: &str = "secretmanager";

/// A stored secret, optionally with its decrypted payload
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    /// Bucket (storage) or project (Secret Manager)
    pub parent: String,
    pub name: String,
    /// Present only after a read or write through this client
    pub plaintext: Option<Vec<u8>>,
    /// Object generation; 0 for Secret Manager
    pub generation: i64,
    /// Object metageneration; 0 for Secret Manager
    pub metageneration: i64,
    /// Secret Manager version id; empty for storage
    pub version: String,
    /// KMS key the data key is wrapped with; empty for Secret Manager
    pub kms_key: String,
    pub updated_at: Option<DateTime<Utc>>,
    /// Explicit replica locations, sorted (Secret Manager only)
    pub locations: Vec<String>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("parent", &self.parent)
            .field("name", &self.name)
            .field("plaintext", &self.plaintext.as_ref().map(|_| "<redacted>"))
            .field("generation", &self.generation)
            .field("metageneration", &self.metageneration)
            .field("version", &self.version)
            .field("kms_key", &self.kms_key)
            .field("updated_at", &self.updated_at)
            .field("locations", &self.locations)
            .finish()
    }
}

impl Secret {
    pub(crate) fn from_object(attrs: &ObjectAttrs, plaintext: Option<Vec<u8>>) -> Self {
        Secret {
            parent: attrs.bucket.clone(),
            name: attrs.name.clone(),
            plaintext,
            generation: attrs.generation,
            metageneration: attrs.metageneration,
            version: String::new(),
            kms_key: attrs.kms_key().unwrap_or_default().to_string(),
            updated_at: attrs.updated,
            locations: Vec::new(),
        }
    }

    pub(crate) fn from_version(version: RegisterVersion, plaintext: Option<Vec<u8>>) -> Self {
        let mut locations = version.locations;
        locations.sort();
        Secret {
            parent: version.project,
            name: version.name,
            plaintext,
            generation: 0,
            metageneration: 0,
            version: version.version,
            kms_key: String::new(),
            updated_at: version.create_time,
            locations,
        }
    }
}

/// Span for one secret operation, parented to the caller's context span
pub(crate) fn operation_span(
    ctx: &Context,
    operation: &'static str,
    backend: &'static str,
    parent: &str,
    name: &str,
) -> Span {
    info_span!(
        parent: ctx.span(),
        "berglas.secret",
        operation,
        backend,
        secret.parent = parent,
        secret.name = name,
        operation.success = field::Empty,
        operation.duration_ms = field::Empty,
        error.kind = field::Empty,
    )
}

/// Replication for an explicit location list; empty means automatic
pub(crate) fn replication_for(locations: &[String]) -> Replication {
    if locations.is_empty() {
        Replication::Automatic
    } else {
        let mut locations = locations.to_vec();
        locations.sort();
        locations.dedup();
        Replication::UserManaged(locations)
    }
}

/// Fail with [`Error::MissingField`] when `value` is empty
pub(crate) fn require(value: &str, field: &'static str) -> Result<()> {
    if value.is_empty() {
        Err(Error::MissingField(field))
    } else {
        Ok(())
    }
}

/// Secret Manager names are a single path segment
pub(crate) fn require_register_name(name: &str) -> Result<()> {
    if name.contains('/') {
        return Err(Error::InvalidRequest(format!(
            "secret manager names cannot contain '/': {name:?}"
        )));
    }
    Ok(())
}

/// Map a provider 404 onto [`Error::NotFound`], anything else onto [`Error::Api`]
pub(crate) fn not_found_or_api(
    operation: &'static str,
    parent: &str,
    name: &str,
    err: ApiError,
) -> Error {
    if err.is_not_found() {
        Error::not_found(parent, name)
    } else {
        Error::api(operation, format!("{parent}/{name}"), err)
    }
}

/// Secret client
///
/// Holds long-lived handles to the three providers; safe to share across
/// concurrent operations.
#[derive(Clone)]
pub struct Client {
    pub(crate) kms: Arc<dyn KeyManagement>,
    pub(crate) storage: Arc<dyn BlobStore>,
    pub(crate) register: Arc<dyn SecretRegister>,
    pub(crate) retry: RetryPolicy,
    pub(crate) delete_workers: usize,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("kms", &self.kms)
            .field("storage", &self.storage)
            .field("register", &self.register)
            .field("retry", &self.retry)
            .field("delete_workers", &self.delete_workers)
            .finish()
    }
}

impl Client {
    /// Create a client backed by the Google REST APIs
    ///
    /// # Errors
    /// Returns [`Error::Api`] if no access token can be obtained.
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        let transport = RestTransport::new(config)
            .await
            .map_err(|e| Error::api("authenticate with", "google cloud", e))?;

        info!(
            storage = %config.storage_endpoint,
            kms = %config.kms_endpoint,
            secretmanager = %config.secret_manager_endpoint,
            "Initialized berglas client"
        );

        Ok(Self {
            kms: Arc::new(KmsREST::new(transport.clone(), &config.kms_endpoint)),
            storage: Arc::new(StorageREST::new(
                transport.clone(),
                &config.storage_endpoint,
            )),
            register: Arc::new(SecretManagerREST::new(
                transport,
                &config.secret_manager_endpoint,
            )),
            retry: config.retry,
            delete_workers: config.delete_worker_count(),
        })
    }

    /// Assemble a client from arbitrary providers with default settings
    #[must_use]
    pub fn from_parts(
        kms: Arc<dyn KeyManagement>,
        storage: Arc<dyn BlobStore>,
        register: Arc<dyn SecretRegister>,
    ) -> Self {
        let config = ClientConfig::default();
        Self {
            kms,
            storage,
            register,
            retry: config.retry,
            delete_workers: config.delete_worker_count(),
        }
    }

    /// Override the policy retry schedule
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the deletion worker pool size (never below 1)
    #[must_use]
    pub fn with_delete_workers(mut self, workers: usize) -> Self {
        self.delete_workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}
