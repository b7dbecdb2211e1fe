//! # Provider Modules
//!
//! Capabilities the secret service consumes, and their implementations.
//!
//! - [`KeyManagement`]: wraps and unwraps data keys with a remote KEK
//! - [`BlobStore`]: versioned objects with generation/metageneration preconditions
//! - [`SecretRegister`]: append-only, auto-versioned secret register
//!
//! Every capability also exposes get/set of the IAM policy on the resources it
//! owns. [`gcp`] talks to the Google REST APIs; [`memory`] keeps everything in
//! process for tests and embedding.

use crate::context::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

mod error;
mod policy;

pub mod gcp;
pub mod memory;

pub use error::{canonical_status, ApiError};
pub use policy::Policy;
pub(crate) use policy::PolicyJson;

use crate::constants::{METADATA_ID_KEY, METADATA_ID_VALUE, METADATA_KMS_KEY};

/// Attributes of one stored object generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttrs {
    pub bucket: String,
    pub name: String,
    pub generation: i64,
    pub metageneration: i64,
    pub metadata: BTreeMap<String, String>,
    pub updated: Option<DateTime<Utc>>,
    pub size: u64,
}

impl ObjectAttrs {
    /// True if the object carries the managed-secret marker
    #[must_use]
    pub fn is_secret(&self) -> bool {
        self.metadata.get(METADATA_ID_KEY).map(String::as_str) == Some(METADATA_ID_VALUE)
    }

    /// KMS key recorded at write time, if present and non-empty
    #[must_use]
    pub fn kms_key(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_KMS_KEY)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }
}

/// Write precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Fail unless no live generation exists
    DoesNotExist,
    /// Fail unless the live generation matches exactly
    Match { generation: i64, metageneration: i64 },
}

/// A single-shot object upload
#[derive(Clone)]
pub struct ObjectWrite {
    pub bucket: String,
    pub name: String,
    pub data: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub cache_control: String,
    pub content_type: String,
    pub precondition: Precondition,
}

impl fmt::Debug for ObjectWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWrite")
            .field("bucket", &self.bucket)
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("metadata", &self.metadata)
            .field("precondition", &self.precondition)
            .finish_non_exhaustive()
    }
}

/// Object listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectQuery {
    pub bucket: String,
    pub prefix: Option<String>,
    /// Include non-current generations
    pub versions: bool,
}

/// Replication settings of a register secret
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Replication {
    /// Service-chosen locations
    #[default]
    Automatic,
    /// Explicit replica locations
    UserManaged(Vec<String>),
}

/// A register secret (the container of versions)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSecret {
    pub project: String,
    pub name: String,
    pub replication: Replication,
    pub create_time: Option<DateTime<Utc>>,
}

/// Lifecycle state of a register version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Enabled,
    Disabled,
    Destroyed,
}

/// Metadata of one register version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterVersion {
    pub project: String,
    pub name: String,
    /// Version id, e.g. "3"
    pub version: String,
    pub state: VersionState,
    pub create_time: Option<DateTime<Utc>>,
    /// Replica locations, empty for automatic replication
    pub locations: Vec<String>,
}

/// Remote key encryption key service
#[async_trait]
pub trait KeyManagement: Send + Sync + fmt::Debug {
    /// Encrypt `plaintext` with `key`, binding `aad`
    async fn encrypt(
        &self,
        ctx: &Context,
        key: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ApiError>;

    /// Decrypt `ciphertext` with `key`, verifying `aad`
    async fn decrypt(
        &self,
        ctx: &Context,
        key: &str,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ApiError>;

    /// Current IAM policy on `key`
    async fn get_key_policy(&self, ctx: &Context, key: &str) -> Result<Policy, ApiError>;

    /// Replace the IAM policy on `key`; fails on a stale etag
    async fn set_key_policy(
        &self,
        ctx: &Context,
        key: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError>;
}

/// Versioned object storage
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Attributes of `generation`, or of the live generation when `None`
    async fn object_attrs(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
        generation: Option<i64>,
    ) -> Result<ObjectAttrs, ApiError>;

    /// Content of an exact generation
    async fn read_object(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<Vec<u8>, ApiError>;

    /// Upload a new generation subject to `write.precondition`
    async fn write_object(&self, ctx: &Context, write: &ObjectWrite) -> Result<ObjectAttrs, ApiError>;

    /// Delete an exact generation
    async fn delete_object(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<(), ApiError>;

    /// List objects, following pagination to the end
    ///
    /// Fails with [`ApiError::Cancelled`] rather than return a partial
    /// listing when `ctx` is cancelled between pages.
    async fn list_objects(
        &self,
        ctx: &Context,
        query: &ObjectQuery,
    ) -> Result<Vec<ObjectAttrs>, ApiError>;

    /// IAM policy on the live object
    async fn get_object_policy(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
    ) -> Result<Policy, ApiError>;

    /// Replace the IAM policy on the live object
    async fn set_object_policy(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError>;
}

/// Append-only secret register
#[async_trait]
pub trait SecretRegister: Send + Sync + fmt::Debug {
    /// Create the container; `ALREADY_EXISTS` if present
    async fn create_secret(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        replication: &Replication,
    ) -> Result<RegisterSecret, ApiError>;

    async fn get_secret(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<RegisterSecret, ApiError>;

    /// Append a version holding `payload`
    async fn add_version(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<RegisterVersion, ApiError>;

    /// Version metadata; `version` may be "latest"
    async fn get_version(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<RegisterVersion, ApiError>;

    /// Version payload; `version` may be "latest"
    async fn access_version(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, ApiError>;

    async fn list_secrets(
        &self,
        ctx: &Context,
        project: &str,
    ) -> Result<Vec<RegisterSecret>, ApiError>;

    async fn list_versions(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<Vec<RegisterVersion>, ApiError>;

    /// Destroy the payload of a single version
    async fn destroy_version(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<(), ApiError>;

    /// Delete the container and every version
    async fn delete_secret(&self, ctx: &Context, project: &str, name: &str)
        -> Result<(), ApiError>;

    async fn get_secret_policy(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<Policy, ApiError>;

    async fn set_secret_policy(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError>;
}
