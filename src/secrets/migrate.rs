//! Copy storage secrets into Secret Manager.

use super::{require, Client, ListRequest, Secret, UpdateRequest};
use crate::context::Context;
use crate::error::{Error, Result};
use tracing::{debug, info, info_span, Instrument};

/// Parameters for [`Client::migrate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateRequest {
    pub bucket: String,
    pub object: String,
    pub project: String,
    /// Target secret name; defaults to the object name with '/' mapped to '_'
    pub name: Option<String>,
    /// Replica locations if the target is created
    pub locations: Vec<String>,
}

/// Parameters for [`Client::migrate_bucket`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateBucketRequest {
    pub bucket: String,
    pub project: String,
    /// Replica locations for every target that is created
    pub locations: Vec<String>,
}

/// Outcome of [`Client::migrate_bucket`]
#[derive(Debug, Default)]
pub struct MigrateReport {
    /// Source object name and the version written for it
    pub migrated: Vec<(String, Secret)>,
    /// Source objects left alone because their plaintext was empty
    pub skipped: Vec<String>,
}

/// Secret Manager name for a storage object: the register has no hierarchy
#[must_use]
pub fn register_name_for(object: &str) -> String {
    object.replace('/', "_")
}

impl Client {
    /// Decrypt the live generation of a storage secret and append it to a
    /// Secret Manager secret, creating the target if needed
    ///
    /// Returns `None` without writing anything when the source plaintext is
    /// empty.
    ///
    /// # Errors
    /// [`Error::InvalidRequest`] for an explicit target name containing '/',
    /// otherwise any error from [`Client::read`] or [`Client::update`].
    pub async fn migrate(&self, ctx: &Context, request: MigrateRequest) -> Result<Option<Secret>> {
        let MigrateRequest {
            bucket,
            object,
            project,
            name,
            locations,
        } = request;
        require(&bucket, "bucket")?;
        require(&object, "object")?;
        require(&project, "project")?;

        let name = name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| register_name_for(&object));

        let span = info_span!(
            parent: ctx.span(),
            "berglas.migrate",
            source = %format!("{bucket}/{object}"),
            target = %format!("{project}/{name}"),
        );

        async {
            let source = self.read_storage(ctx, &bucket, &object, 0).await?;
            let plaintext = match source.plaintext {
                Some(plaintext) if !plaintext.is_empty() => plaintext,
                _ => {
                    info!(generation = source.generation, "skipped secret with empty plaintext");
                    return Ok(None);
                }
            };

            let migrated = self
                .update(
                    ctx,
                    UpdateRequest::SecretManager {
                        project,
                        name,
                        plaintext: Some(plaintext),
                        locations,
                        create_if_missing: true,
                    },
                )
                .await?;

            info!(
                generation = source.generation,
                version = %migrated.version,
                "migrated secret"
            );
            Ok(Some(migrated))
        }
        .instrument(span)
        .await
    }

    /// Migrate every live secret in a bucket, in name order
    ///
    /// Stops at the first failure; secrets migrated before it stay migrated.
    ///
    /// # Errors
    /// [`Error::Cancelled`] if `ctx` is cancelled between secrets, otherwise
    /// any error from [`Client::list`] or [`Client::migrate`].
    pub async fn migrate_bucket(
        &self,
        ctx: &Context,
        request: MigrateBucketRequest,
    ) -> Result<MigrateReport> {
        let MigrateBucketRequest {
            bucket,
            project,
            locations,
        } = request;
        require(&bucket, "bucket")?;
        require(&project, "project")?;

        let listed = self
            .list(
                ctx,
                ListRequest::Storage {
                    bucket: bucket.clone(),
                    prefix: None,
                    generations: false,
                },
            )
            .await?;
        debug!(count = listed.secrets.len(), "migrating bucket");

        let mut report = MigrateReport::default();
        for source in listed.secrets {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let migrated = self
                .migrate(
                    ctx,
                    MigrateRequest {
                        bucket: bucket.clone(),
                        object: source.name.clone(),
                        project: project.clone(),
                        name: None,
                        locations: locations.clone(),
                    },
                )
                .await?;
            match migrated {
                Some(secret) => report.migrated.push((source.name, secret)),
                None => report.skipped.push(source.name),
            }
        }
        Ok(report)
    }
}
