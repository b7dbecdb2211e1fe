//! Create a new secret.
//!
//! Storage writes use a "does not exist" precondition so the first writer
//! wins; Secret Manager creates the container and then version 1.

use super::{
    operation_span, replication_for, require, require_register_name, Client, Secret,
    SECRET_MANAGER_BACKEND, STORAGE_BACKEND,
};
use crate::constants::{
    CACHE_CONTROL, ENVELOPE_CONTENT_TYPE, METADATA_ID_KEY, METADATA_ID_VALUE, METADATA_KMS_KEY,
};
use crate::context::Context;
use crate::crypto::{seal, trim_key_version};
use crate::error::{Error, Result};
use crate::observability::OperationTracker;
use crate::provider::{ObjectWrite, Precondition};
use std::collections::BTreeMap;
use tracing::{debug, Instrument};

/// Parameters for [`Client::create`]
#[derive(Clone, PartialEq, Eq)]
pub enum CreateRequest {
    /// Envelope-encrypt into a Cloud Storage object
    Storage {
        bucket: String,
        object: String,
        /// KMS crypto key; a trailing key version is trimmed
        key: String,
        plaintext: Vec<u8>,
    },
    /// Store in Secret Manager
    SecretManager {
        project: String,
        name: String,
        plaintext: Vec<u8>,
        /// Explicit replica locations; automatic when empty
        locations: Vec<String>,
    },
}

impl std::fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateRequest::Storage {
                bucket,
                object,
                key,
                ..
            } => f
                .debug_struct("Storage")
                .field("bucket", bucket)
                .field("object", object)
                .field("key", key)
                .finish_non_exhaustive(),
            CreateRequest::SecretManager {
                project,
                name,
                locations,
                ..
            } => f
                .debug_struct("SecretManager")
                .field("project", project)
                .field("name", name)
                .field("locations", locations)
                .finish_non_exhaustive(),
        }
    }
}

impl Client {
    /// Create a secret, failing with [`Error::AlreadyExists`] if it exists
    ///
    /// # Errors
    /// [`Error::MissingField`] for empty identifiers or key,
    /// [`Error::AlreadyExists`] on collision, [`Error::Api`] for backend failures.
    pub async fn create(&self, ctx: &Context, request: CreateRequest) -> Result<Secret> {
        let (backend, span) = match &request {
            CreateRequest::Storage { bucket, object, .. } => (
                STORAGE_BACKEND,
                operation_span(ctx, "create", STORAGE_BACKEND, bucket, object),
            ),
            CreateRequest::SecretManager { project, name, .. } => (
                SECRET_MANAGER_BACKEND,
                operation_span(ctx, "create", SECRET_MANAGER_BACKEND, project, name),
            ),
        };
        let tracker = OperationTracker::new("create", backend, span.clone());

        let result = async {
            match request {
                CreateRequest::Storage {
                    bucket,
                    object,
                    key,
                    plaintext,
                } => {
                    require(&bucket, "bucket")?;
                    require(&object, "object")?;
                    require(&key, "key")?;
                    self.write_storage(
                        ctx,
                        &bucket,
                        &object,
                        &key,
                        plaintext,
                        Precondition::DoesNotExist,
                    )
                    .await
                }
                CreateRequest::SecretManager {
                    project,
                    name,
                    plaintext,
                    locations,
                } => {
                    require(&project, "project")?;
                    require(&name, "name")?;
                    self.create_register(ctx, &project, &name, &plaintext, &locations)
                        .await
                }
            }
        }
        .instrument(span)
        .await;

        tracker.finish(result)
    }

    /// Seal `plaintext` and upload it under `precondition`
    pub(crate) async fn write_storage(
        &self,
        ctx: &Context,
        bucket: &str,
        object: &str,
        key: &str,
        plaintext: Vec<u8>,
        precondition: Precondition,
    ) -> Result<Secret> {
        let key = trim_key_version(key);
        let envelope = seal(self.kms.as_ref(), ctx, key, &plaintext, object.as_bytes()).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_ID_KEY.to_string(), METADATA_ID_VALUE.to_string());
        metadata.insert(METADATA_KMS_KEY.to_string(), key.to_string());

        let write = ObjectWrite {
            bucket: bucket.to_string(),
            name: object.to_string(),
            data: envelope.encode().into_bytes(),
            metadata,
            cache_control: CACHE_CONTROL.to_string(),
            content_type: ENVELOPE_CONTENT_TYPE.to_string(),
            precondition,
        };

        let attrs = match self.storage.write_object(ctx, &write).await {
            Ok(attrs) => attrs,
            Err(e) if e.is_precondition_failed() => {
                return Err(match precondition {
                    Precondition::DoesNotExist => Error::already_exists(bucket, object),
                    Precondition::Match { .. } => Error::modified(bucket, object),
                });
            }
            Err(e) => return Err(Error::api("write secret", format!("{bucket}/{object}"), e)),
        };

        debug!(
            generation = attrs.generation,
            metageneration = attrs.metageneration,
            "stored secret object"
        );
        Ok(Secret::from_object(&attrs, Some(plaintext)))
    }

    async fn create_register(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        plaintext: &[u8],
        locations: &[String],
    ) -> Result<Secret> {
        require_register_name(name)?;

        self.register
            .create_secret(ctx, project, name, &replication_for(locations))
            .await
            .map_err(|e| {
                if e.is_already_exists() || e.code() == Some(409) {
                    Error::already_exists(project, name)
                } else {
                    Error::api("create secret", format!("{project}/{name}"), e)
                }
            })?;

        let version = self
            .register
            .add_version(ctx, project, name, plaintext)
            .await
            .map_err(|e| Error::api("add version to", format!("{project}/{name}"), e))?;

        debug!(version = %version.version, "created secret manager secret");
        Ok(Secret::from_version(version, Some(plaintext.to_vec())))
    }
}
