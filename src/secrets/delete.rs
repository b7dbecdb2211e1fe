//! Delete a secret and every stored version of it.
//!
//! Storage deletes fan out over a bounded worker pool, one task per
//! generation, each deleting by explicit generation so it cannot race a
//! concurrent writer. The first failure is recorded and cancels a shared
//! token: tasks that have not started yet are skipped, tasks already in
//! flight finish. A secret that does not exist deletes successfully.

use super::{operation_span, require, Client, SECRET_MANAGER_BACKEND, STORAGE_BACKEND};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::observability::{metrics, OperationTracker};
use crate::provider::{BlobStore, ObjectQuery};
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

/// Parameters for [`Client::delete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteRequest {
    /// Remove every generation of the object
    Storage { bucket: String, object: String },
    /// Remove the whole secret, or only destroy `version` when set
    SecretManager {
        project: String,
        name: String,
        version: Option<String>,
    },
}

/// Outcome of one generation delete task
enum TaskOutcome {
    Deleted,
    Skipped,
    Failed,
}

impl Client {
    /// Delete a secret; absent secrets are not an error
    ///
    /// # Errors
    /// The first backend failure observed, after all started work drains.
    pub async fn delete(&self, ctx: &Context, request: DeleteRequest) -> Result<()> {
        let (backend, span) = match &request {
            DeleteRequest::Storage { bucket, object } => (
                STORAGE_BACKEND,
                operation_span(ctx, "delete", STORAGE_BACKEND, bucket, object),
            ),
            DeleteRequest::SecretManager { project, name, .. } => (
                SECRET_MANAGER_BACKEND,
                operation_span(ctx, "delete", SECRET_MANAGER_BACKEND, project, name),
            ),
        };
        let tracker = OperationTracker::new("delete", backend, span.clone());

        let result = async {
            match request {
                DeleteRequest::Storage { bucket, object } => {
                    require(&bucket, "bucket")?;
                    require(&object, "object")?;
                    self.delete_storage(ctx, &bucket, &object).await
                }
                DeleteRequest::SecretManager {
                    project,
                    name,
                    version,
                } => {
                    require(&project, "project")?;
                    require(&name, "name")?;
                    self.delete_register(ctx, &project, &name, version.as_deref())
                        .await
                }
            }
        }
        .instrument(span)
        .await;

        tracker.finish(result)
    }

    async fn delete_storage(&self, ctx: &Context, bucket: &str, object: &str) -> Result<()> {
        let query = ObjectQuery {
            bucket: bucket.to_string(),
            prefix: Some(object.to_string()),
            versions: true,
        };
        let generations: Vec<i64> = self
            .storage
            .list_objects(ctx, &query)
            .await
            .map_err(|e| Error::api("list versions of", format!("{bucket}/{object}"), e))?
            .into_iter()
            .filter(|attrs| attrs.name == object)
            .map(|attrs| attrs.generation)
            .collect();

        if generations.is_empty() {
            debug!("no stored versions, nothing to delete");
            return Ok(());
        }

        let workers = self.delete_workers.max(1);
        debug!(versions = generations.len(), workers, "deleting stored versions");

        let cancel = ctx.child();
        let semaphore = Arc::new(Semaphore::new(workers));
        let first_error = Arc::new(OnceLock::new());
        let mut tasks = JoinSet::new();

        for generation in generations {
            let storage: Arc<dyn BlobStore> = Arc::clone(&self.storage);
            let semaphore = Arc::clone(&semaphore);
            let first_error = Arc::clone(&first_error);
            let cancel = cancel.clone();
            let bucket = bucket.to_string();
            let object = object.to_string();

            tasks.spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return TaskOutcome::Skipped;
                    };
                    if cancel.is_cancelled() {
                        return TaskOutcome::Skipped;
                    }

                    match storage
                        .delete_object(&cancel, &bucket, &object, generation)
                        .await
                    {
                        Ok(()) => TaskOutcome::Deleted,
                        Err(e) if e.is_not_found() => TaskOutcome::Deleted,
                        Err(e) => {
                            let err =
                                Error::api("delete", format!("{bucket}/{object}#{generation}"), e);
                            warn!(error = %err, "failed to delete version");
                            // later failures only log; the earliest is reported
                            let _ = first_error.set(err);
                            cancel.cancel();
                            TaskOutcome::Failed
                        }
                    }
                }
                .in_current_span(),
            );
        }

        let mut deleted = 0_u64;
        let mut skipped = 0_u64;
        let mut aborted = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Deleted) => deleted += 1,
                Ok(TaskOutcome::Skipped) => skipped += 1,
                Ok(TaskOutcome::Failed) => {}
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => aborted = true,
            }
        }

        metrics::increment_objects_deleted(deleted);
        let first_error = Arc::into_inner(first_error).and_then(OnceLock::into_inner);
        match first_error {
            Some(e) => Err(e),
            None if skipped > 0 || aborted => Err(Error::Cancelled),
            None => {
                info!(deleted, "deleted secret");
                Ok(())
            }
        }
    }

    async fn delete_register(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
        version: Option<&str>,
    ) -> Result<()> {
        let outcome = match version {
            Some(version) => {
                self.register
                    .destroy_version(ctx, project, name, version)
                    .await
            }
            None => self.register.delete_secret(ctx, project, name).await,
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("secret already absent");
                Ok(())
            }
            Err(e) => Err(Error::api("delete", format!("{project}/{name}"), e)),
        }
    }
}
