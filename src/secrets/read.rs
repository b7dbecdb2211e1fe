//! Read and access secrets.
//!
//! `read` returns the full [`Secret`] including its plaintext; `access`
//! returns only the plaintext bytes.

use super::{
    not_found_or_api, operation_span, require, Client, Secret, SECRET_MANAGER_BACKEND,
    STORAGE_BACKEND,
};
use crate::constants::LATEST_VERSION;
use crate::context::Context;
use crate::crypto::{open, Envelope};
use crate::error::{Error, Result};
use crate::observability::OperationTracker;
use tracing::{debug, Instrument};

/// Parameters for [`Client::read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRequest {
    Storage {
        bucket: String,
        object: String,
        /// Exact generation; 0 reads the live generation
        generation: i64,
    },
    SecretManager {
        project: String,
        name: String,
        /// Version id; empty reads `latest`
        version: String,
    },
}

/// Parameters for [`Client::access`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequest {
    Storage {
        bucket: String,
        object: String,
        generation: i64,
    },
    SecretManager {
        project: String,
        name: String,
        version: String,
    },
}

impl From<AccessRequest> for ReadRequest {
    fn from(request: AccessRequest) -> Self {
        match request {
            AccessRequest::Storage {
                bucket,
                object,
                generation,
            } => ReadRequest::Storage {
                bucket,
                object,
                generation,
            },
            AccessRequest::SecretManager {
                project,
                name,
                version,
            } => ReadRequest::SecretManager {
                project,
                name,
                version,
            },
        }
    }
}

impl Client {
    /// Plaintext of a secret
    ///
    /// # Errors
    /// Same as [`Client::read`].
    pub async fn access(&self, ctx: &Context, request: AccessRequest) -> Result<Vec<u8>> {
        let secret = self.read(ctx, request.into()).await?;
        Ok(secret.plaintext.unwrap_or_default())
    }

    /// Fetch and decrypt a secret
    ///
    /// # Errors
    /// [`Error::NotFound`] if the secret or version is absent,
    /// [`Error::InvalidSecret`] / [`Error::MalformedCiphertext`] for corrupt
    /// storage objects, [`Error::DecryptionFailed`] on authentication failure.
    pub async fn read(&self, ctx: &Context, request: ReadRequest) -> Result<Secret> {
        let (backend, span) = match &request {
            ReadRequest::Storage { bucket, object, .. } => (
                STORAGE_BACKEND,
                operation_span(ctx, "read", STORAGE_BACKEND, bucket, object),
            ),
            ReadRequest::SecretManager { project, name, .. } => (
                SECRET_MANAGER_BACKEND,
                operation_span(ctx, "read", SECRET_MANAGER_BACKEND, project, name),
            ),
        };
        let tracker = OperationTracker::new("read", backend, span.clone());

        let result = async {
            match request {
                ReadRequest::Storage {
                    bucket,
                    object,
                    generation,
                } => {
                    require(&bucket, "bucket")?;
                    require(&object, "object")?;
                    self.read_storage(ctx, &bucket, &object, generation).await
                }
                ReadRequest::SecretManager {
                    project,
                    name,
                    version,
                } => {
                    require(&project, "project")?;
                    require(&name, "name")?;
                    let version = if version.is_empty() {
                        LATEST_VERSION.to_string()
                    } else {
                        version
                    };
                    self.read_register(ctx, &project, &name, &version).await
                }
            }
        }
        .instrument(span)
        .await;

        tracker.finish(result)
    }

    pub(crate) async fn read_storage(
        &self,
        ctx: &Context,
        bucket: &str,
        object: &str,
        generation: i64,
    ) -> Result<Secret> {
        let pinned = (generation != 0).then_some(generation);
        let attrs = self
            .storage
            .object_attrs(ctx, bucket, object, pinned)
            .await
            .map_err(|e| not_found_or_api("read attributes of", bucket, object, e))?;

        let key = attrs.kms_key().ok_or_else(|| Error::InvalidSecret {
            parent: bucket.to_string(),
            name: object.to_string(),
            reason: "missing kms key in object metadata".to_string(),
        })?;

        let data = self
            .storage
            .read_object(ctx, bucket, object, attrs.generation)
            .await
            .map_err(|e| not_found_or_api("read", bucket, object, e))?;

        let envelope = Envelope::parse(&data)?;
        let plaintext = open(self.kms.as_ref(), ctx, key, &envelope, object.as_bytes()).await?;

        debug!(generation = attrs.generation, "decrypted secret object");
        Ok(Secret::from_object(&attrs, Some(plaintext)))
    }

    async fn read_register(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<Secret> {
        let metadata = self
            .register
            .get_version(ctx, project, name, version)
            .await
            .map_err(|e| not_found_or_api("read version of", project, name, e))?;

        let plaintext = self
            .register
            .access_version(ctx, project, name, &metadata.version)
            .await
            .map_err(|e| not_found_or_api("access", project, name, e))?;

        debug!(version = %metadata.version, "accessed secret manager version");
        Ok(Secret::from_version(metadata, Some(plaintext)))
    }
}
