//! Update an existing secret.
//!
//! Storage updates are compare-and-swap on generation and metageneration.
//! Omitted fields are filled in from the live object, and the object's IAM
//! bindings are carried onto the new generation because a rewrite starts
//! with an empty policy. Bindings are unioned into whatever the new
//! generation already has, never overwritten.

use super::iam::PolicyResource;
use super::{
    not_found_or_api, operation_span, replication_for, require, require_register_name, Client,
    Secret, SECRET_MANAGER_BACKEND, STORAGE_BACKEND,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::observability::OperationTracker;
use crate::provider::Precondition;
use tracing::{debug, Instrument};

/// Parameters for [`Client::update`]
#[derive(Clone, PartialEq, Eq)]
pub enum UpdateRequest {
    Storage {
        bucket: String,
        object: String,
        /// Expected generation; 0 uses the live one
        generation: i64,
        /// Expected metageneration; 0 uses the live one
        metageneration: i64,
        /// New KMS key; defaults to the current key
        key: Option<String>,
        /// New payload; defaults to re-encrypting the current payload
        plaintext: Option<Vec<u8>>,
        create_if_missing: bool,
    },
    SecretManager {
        project: String,
        name: String,
        plaintext: Option<Vec<u8>>,
        /// Replica locations used only when the secret is created
        locations: Vec<String>,
        create_if_missing: bool,
    },
}

impl std::fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateRequest::Storage {
                bucket,
                object,
                generation,
                metageneration,
                key,
                create_if_missing,
                ..
            } => f
                .debug_struct("Storage")
                .field("bucket", bucket)
                .field("object", object)
                .field("generation", generation)
                .field("metageneration", metageneration)
                .field("key", key)
                .field("create_if_missing", create_if_missing)
                .finish_non_exhaustive(),
            UpdateRequest::SecretManager {
                project,
                name,
                locations,
                create_if_missing,
                ..
            } => f
                .debug_struct("SecretManager")
                .field("project", project)
                .field("name", name)
                .field("locations", locations)
                .field("create_if_missing", create_if_missing)
                .finish_non_exhaustive(),
        }
    }
}

impl Client {
    /// Write a new version of a secret
    ///
    /// # Errors
    /// [`Error::ModifiedConcurrently`] when the storage object changed since
    /// the given generation, [`Error::NotFound`] when absent and
    /// `create_if_missing` is false, [`Error::MissingField`] when a new
    /// secret lacks its key or plaintext.
    pub async fn update(&self, ctx: &Context, request: UpdateRequest) -> Result<Secret> {
        let (backend, span) = match &request {
            UpdateRequest::Storage { bucket, object, .. } => (
                STORAGE_BACKEND,
                operation_span(ctx, "update", STORAGE_BACKEND, bucket, object),
            ),
            UpdateRequest::SecretManager { project, name, .. } => (
                SECRET_MANAGER_BACKEND,
                operation_span(ctx, "update", SECRET_MANAGER_BACKEND, project, name),
            ),
        };
        let tracker = OperationTracker::new("update", backend, span.clone());

        let result = async {
            match request {
                UpdateRequest::Storage {
                    bucket,
                    object,
                    generation,
                    metageneration,
                    key,
                    plaintext,
                    create_if_missing,
                } => {
                    require(&bucket, "bucket")?;
                    require(&object, "object")?;
                    self.update_storage(
                        ctx,
                        &bucket,
                        &object,
                        (generation, metageneration),
                        key,
                        plaintext,
                        create_if_missing,
                    )
                    .await
                }
                UpdateRequest::SecretManager {
                    project,
                    name,
                    plaintext,
                    locations,
                    create_if_missing,
                } => {
                    require(&project, "project")?;
                    require(&name, "name")?;
                    let plaintext = plaintext.ok_or(Error::MissingField("plaintext"))?;
                    self.update_register(
                        ctx,
                        &project,
                        &name,
                        &plaintext,
                        &locations,
                        create_if_missing,
                    )
                    .await
                }
            }
        }
        .instrument(span)
        .await;

        tracker.finish(result)
    }

    #[allow(
        clippy::too_many_arguments,
        reason = "mirrors the storage variant of UpdateRequest field for field"
    )]
    async fn update_storage(
        &self,
        ctx: &Context,
        bucket: &str,
        object: &str,
        expected: (i64, i64),
        key: Option<String>,
        plaintext: Option<Vec<u8>>,
        create_if_missing: bool,
    ) -> Result<Secret> {
        let attrs = match self.storage.object_attrs(ctx, bucket, object, None).await {
            Ok(attrs) => attrs,
            Err(e) if e.is_not_found() => {
                if !create_if_missing {
                    return Err(Error::not_found(bucket, object));
                }
                let key = key
                    .filter(|k| !k.is_empty())
                    .ok_or(Error::MissingField("key"))?;
                let plaintext = plaintext.ok_or(Error::MissingField("plaintext"))?;
                debug!("secret missing, creating");
                return self
                    .write_storage(
                        ctx,
                        bucket,
                        object,
                        &key,
                        plaintext,
                        Precondition::DoesNotExist,
                    )
                    .await;
            }
            Err(e) => return Err(Error::api("read attributes of", format!("{bucket}/{object}"), e)),
        };

        let generation = if expected.0 == 0 { attrs.generation } else { expected.0 };
        let metageneration = if expected.1 == 0 {
            attrs.metageneration
        } else {
            expected.1
        };

        let key = match key.filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => attrs
                .kms_key()
                .ok_or_else(|| Error::InvalidSecret {
                    parent: bucket.to_string(),
                    name: object.to_string(),
                    reason: "missing kms key in object metadata".to_string(),
                })?
                .to_string(),
        };

        let plaintext = match plaintext {
            Some(plaintext) => plaintext,
            None => self
                .read_storage(ctx, bucket, object, attrs.generation)
                .await?
                .plaintext
                .unwrap_or_default(),
        };

        let bindings = self
            .storage
            .get_object_policy(ctx, bucket, object)
            .await
            .map_err(|e| not_found_or_api("read policy of", bucket, object, e))?;

        let secret = self
            .write_storage(
                ctx,
                bucket,
                object,
                &key,
                plaintext,
                Precondition::Match {
                    generation,
                    metageneration,
                },
            )
            .await?;

        if !bindings.bindings.is_empty() {
            self.update_policy(ctx, PolicyResource::Object { bucket, object }, |policy| {
                policy.merge(&bindings);
            })
            .await?;
            debug!(roles = bindings.bindings.len(), "restored object policy");
        }

        Ok(secret)
    }

    async fn update_register(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        plaintext: &[u8],
        locations: &[String],
        create_if_missing: bool,
    ) -> Result<Secret> {
        require_register_name(name)?;

        match self.register.get_secret(ctx, project, name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                if !create_if_missing {
                    return Err(Error::not_found(project, name));
                }
                debug!("secret missing, creating");
                match self
                    .register
                    .create_secret(ctx, project, name, &replication_for(locations))
                    .await
                {
                    Ok(_) => {}
                    // lost a create race; append to the winner's secret
                    Err(e) if e.is_already_exists() => {}
                    Err(e) => {
                        return Err(Error::api("create secret", format!("{project}/{name}"), e))
                    }
                }
            }
            Err(e) => return Err(Error::api("read", format!("{project}/{name}"), e)),
        }

        let version = self
            .register
            .add_version(ctx, project, name, plaintext)
            .await
            .map_err(|e| not_found_or_api("add version to", project, name, e))?;

        debug!(version = %version.version, "added secret manager version");
        Ok(Secret::from_version(version, Some(plaintext.to_vec())))
    }
}
