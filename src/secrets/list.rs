//! List secrets in a bucket or project.
//!
//! Storage listings keep only objects carrying the managed-secret marker so
//! unrelated objects sharing the bucket are ignored. Results are sorted by
//! name, then newest generation (or version) first.

use super::{operation_span, require, Client, Secret, SECRET_MANAGER_BACKEND, STORAGE_BACKEND};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::observability::OperationTracker;
use crate::provider::{ObjectQuery, Replication};
use tracing::{debug, Instrument};

/// Parameters for [`Client::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListRequest {
    Storage {
        bucket: String,
        prefix: Option<String>,
        /// Include every stored generation, not just the live one
        generations: bool,
    },
    SecretManager {
        project: String,
        prefix: Option<String>,
        /// Expand each secret into its versions
        versions: bool,
    },
}

/// Secrets found by [`Client::list`], without plaintext
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResponse {
    pub secrets: Vec<Secret>,
}

/// Numeric-aware ordering key for register version ids
fn version_key(version: &str) -> (u64, &str) {
    (version.parse().unwrap_or(0), version)
}

impl Client {
    /// List managed secrets
    ///
    /// # Errors
    /// [`Error::MissingField`] without a bucket or project, [`Error::Api`]
    /// for backend failures.
    pub async fn list(&self, ctx: &Context, request: ListRequest) -> Result<ListResponse> {
        let (backend, span) = match &request {
            ListRequest::Storage { bucket, .. } => (
                STORAGE_BACKEND,
                operation_span(ctx, "list", STORAGE_BACKEND, bucket, ""),
            ),
            ListRequest::SecretManager { project, .. } => (
                SECRET_MANAGER_BACKEND,
                operation_span(ctx, "list", SECRET_MANAGER_BACKEND, project, ""),
            ),
        };
        let tracker = OperationTracker::new("list", backend, span.clone());

        let result = async {
            match request {
                ListRequest::Storage {
                    bucket,
                    prefix,
                    generations,
                } => {
                    require(&bucket, "bucket")?;
                    self.list_storage(ctx, &bucket, prefix, generations).await
                }
                ListRequest::SecretManager {
                    project,
                    prefix,
                    versions,
                } => {
                    require(&project, "project")?;
                    self.list_register(ctx, &project, prefix.as_deref(), versions)
                        .await
                }
            }
        }
        .instrument(span)
        .await;

        tracker.finish(result)
    }

    async fn list_storage(
        &self,
        ctx: &Context,
        bucket: &str,
        prefix: Option<String>,
        generations: bool,
    ) -> Result<ListResponse> {
        let query = ObjectQuery {
            bucket: bucket.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()),
            versions: generations,
        };
        let objects = self
            .storage
            .list_objects(ctx, &query)
            .await
            .map_err(|e| Error::api("list secrets in", bucket, e))?;

        let mut secrets: Vec<Secret> = objects
            .iter()
            .filter(|attrs| attrs.is_secret())
            .map(|attrs| Secret::from_object(attrs, None))
            .collect();
        secrets.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| b.generation.cmp(&a.generation))
        });

        debug!(count = secrets.len(), "listed storage secrets");
        Ok(ListResponse { secrets })
    }

    async fn list_register(
        &self,
        ctx: &Context,
        project: &str,
        prefix: Option<&str>,
        versions: bool,
    ) -> Result<ListResponse> {
        let mut registered = self
            .register
            .list_secrets(ctx, project)
            .await
            .map_err(|e| Error::api("list secrets in", project, e))?;
        if let Some(prefix) = prefix {
            registered.retain(|s| s.name.starts_with(prefix));
        }
        registered.sort_by(|a, b| a.name.cmp(&b.name));

        let mut secrets = Vec::with_capacity(registered.len());
        for secret in registered {
            if !versions {
                let mut locations = match secret.replication {
                    Replication::Automatic => Vec::new(),
                    Replication::UserManaged(locations) => locations,
                };
                locations.sort();
                secrets.push(Secret {
                    parent: secret.project,
                    name: secret.name,
                    plaintext: None,
                    generation: 0,
                    metageneration: 0,
                    version: String::new(),
                    kms_key: String::new(),
                    updated_at: secret.create_time,
                    locations,
                });
                continue;
            }

            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let mut found = self
                .register
                .list_versions(ctx, project, &secret.name)
                .await
                .map_err(|e| Error::api("list versions of", format!("{project}/{}", secret.name), e))?;
            found.sort_by(|a, b| version_key(&b.version).cmp(&version_key(&a.version)));
            secrets.extend(found.into_iter().map(|v| Secret::from_version(v, None)));
        }

        debug!(count = secrets.len(), "listed secret manager secrets");
        Ok(ListResponse { secrets })
    }
}
