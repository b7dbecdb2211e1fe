//! Grant and revoke read access.
//!
//! Policy APIs are eventually consistent and guarded by etags, so every
//! change is a read-modify-write cycle run through [`retry`]. Conflicts,
//! "still propagating" precondition failures and 5xx responses are retried;
//! every other client error is fatal.
//!
//! For storage secrets the member is bound on both the object (object
//! reader) and the KMS key named in the object metadata (key decrypter).

use super::{
    not_found_or_api, operation_span, require, Client, SECRET_MANAGER_BACKEND, STORAGE_BACKEND,
};
use crate::constants::{ROLE_KEY_DECRYPTER, ROLE_OBJECT_READER, ROLE_SECRET_ACCESSOR};
use crate::context::Context;
use crate::error::{Error, PolicyTarget, Result};
use crate::observability::OperationTracker;
use crate::provider::{ApiError, Policy};
use crate::retry::{retry, RetryError};
use tracing::{debug, info, Instrument};

/// Parameters for [`Client::grant`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantRequest {
    Storage {
        bucket: String,
        object: String,
        members: Vec<String>,
    },
    SecretManager {
        project: String,
        name: String,
        members: Vec<String>,
    },
}

/// Parameters for [`Client::revoke`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeRequest {
    Storage {
        bucket: String,
        object: String,
        members: Vec<String>,
    },
    SecretManager {
        project: String,
        name: String,
        members: Vec<String>,
    },
}

/// Resource whose IAM policy is being changed
#[derive(Debug, Clone, Copy)]
pub(crate) enum PolicyResource<'a> {
    Object { bucket: &'a str, object: &'a str },
    Key(&'a str),
    Secret { project: &'a str, name: &'a str },
}

impl PolicyResource<'_> {
    fn target(&self) -> PolicyTarget {
        match self {
            PolicyResource::Object { .. } => PolicyTarget::Storage,
            PolicyResource::Key(_) => PolicyTarget::Key,
            PolicyResource::Secret { .. } => PolicyTarget::Secret,
        }
    }

    fn location(&self) -> String {
        match self {
            PolicyResource::Object { bucket, object } => format!("{bucket}/{object}"),
            PolicyResource::Key(key) => (*key).to_string(),
            PolicyResource::Secret { project, name } => format!("{project}/{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Add,
    Remove,
}

fn apply(policy: &mut Policy, change: Change, role: &str, members: &[String]) {
    for member in members {
        match change {
            Change::Add => {
                policy.add(role, member);
            }
            Change::Remove => {
                policy.remove(role, member);
            }
        }
    }
}

impl Client {
    /// Grant `members` read access to a secret
    ///
    /// An empty member list is a no-op.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the secret is absent,
    /// [`Error::PolicyPropagationFailed`] once retries are exhausted.
    pub async fn grant(&self, ctx: &Context, request: GrantRequest) -> Result<()> {
        match request {
            GrantRequest::Storage {
                bucket,
                object,
                members,
            } => {
                self.change_storage_access(ctx, "grant", Change::Add, &bucket, &object, &members)
                    .await
            }
            GrantRequest::SecretManager {
                project,
                name,
                members,
            } => {
                self.change_register_access(ctx, "grant", Change::Add, &project, &name, &members)
                    .await
            }
        }
    }

    /// Revoke read access from `members`
    ///
    /// Members that never held access are ignored.
    ///
    /// # Errors
    /// Same as [`Client::grant`].
    pub async fn revoke(&self, ctx: &Context, request: RevokeRequest) -> Result<()> {
        match request {
            RevokeRequest::Storage {
                bucket,
                object,
                members,
            } => {
                self.change_storage_access(
                    ctx,
                    "revoke",
                    Change::Remove,
                    &bucket,
                    &object,
                    &members,
                )
                .await
            }
            RevokeRequest::SecretManager {
                project,
                name,
                members,
            } => {
                self.change_register_access(
                    ctx,
                    "revoke",
                    Change::Remove,
                    &project,
                    &name,
                    &members,
                )
                .await
            }
        }
    }

    async fn change_storage_access(
        &self,
        ctx: &Context,
        operation: &'static str,
        change: Change,
        bucket: &str,
        object: &str,
        members: &[String],
    ) -> Result<()> {
        let span = operation_span(ctx, operation, STORAGE_BACKEND, bucket, object);
        let tracker = OperationTracker::new(operation, STORAGE_BACKEND, span.clone());

        let result = async {
            require(bucket, "bucket")?;
            require(object, "object")?;
            if members.is_empty() {
                debug!("no members given, nothing to change");
                return Ok(());
            }

            let attrs = self
                .storage
                .object_attrs(ctx, bucket, object, None)
                .await
                .map_err(|e| not_found_or_api("read attributes of", bucket, object, e))?;
            let key = attrs.kms_key().ok_or_else(|| Error::InvalidSecret {
                parent: bucket.to_string(),
                name: object.to_string(),
                reason: "missing kms key in object metadata".to_string(),
            })?;

            self.update_policy(ctx, PolicyResource::Object { bucket, object }, |policy| {
                apply(policy, change, ROLE_OBJECT_READER, members);
            })
            .await?;
            self.update_policy(ctx, PolicyResource::Key(key), |policy| {
                apply(policy, change, ROLE_KEY_DECRYPTER, members);
            })
            .await?;

            info!(members = members.len(), key, "updated storage and key access");
            Ok(())
        }
        .instrument(span)
        .await;

        tracker.finish(result)
    }

    async fn change_register_access(
        &self,
        ctx: &Context,
        operation: &'static str,
        change: Change,
        project: &str,
        name: &str,
        members: &[String],
    ) -> Result<()> {
        let span = operation_span(ctx, operation, SECRET_MANAGER_BACKEND, project, name);
        let tracker = OperationTracker::new(operation, SECRET_MANAGER_BACKEND, span.clone());

        let result = async {
            require(project, "project")?;
            require(name, "name")?;
            if members.is_empty() {
                debug!("no members given, nothing to change");
                return Ok(());
            }

            self.register
                .get_secret(ctx, project, name)
                .await
                .map_err(|e| not_found_or_api("read", project, name, e))?;

            self.update_policy(ctx, PolicyResource::Secret { project, name }, |policy| {
                apply(policy, change, ROLE_SECRET_ACCESSOR, members);
            })
            .await?;

            info!(members = members.len(), "updated secret access");
            Ok(())
        }
        .instrument(span)
        .await;

        tracker.finish(result)
    }

    async fn get_policy(&self, ctx: &Context, resource: PolicyResource<'_>) -> Result<Policy, ApiError> {
        match resource {
            PolicyResource::Object { bucket, object } => {
                self.storage.get_object_policy(ctx, bucket, object).await
            }
            PolicyResource::Key(key) => self.kms.get_key_policy(ctx, key).await,
            PolicyResource::Secret { project, name } => {
                self.register.get_secret_policy(ctx, project, name).await
            }
        }
    }

    async fn set_policy(
        &self,
        ctx: &Context,
        resource: PolicyResource<'_>,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        match resource {
            PolicyResource::Object { bucket, object } => {
                self.storage
                    .set_object_policy(ctx, bucket, object, policy)
                    .await
            }
            PolicyResource::Key(key) => self.kms.set_key_policy(ctx, key, policy).await,
            PolicyResource::Secret { project, name } => {
                self.register
                    .set_secret_policy(ctx, project, name, policy)
                    .await
            }
        }
    }

    /// Read-modify-write `resource`'s policy until it sticks
    pub(crate) async fn update_policy<M>(
        &self,
        ctx: &Context,
        resource: PolicyResource<'_>,
        mutate: M,
    ) -> Result<()>
    where
        M: Fn(&mut Policy),
    {
        let mutate = &mutate;
        let outcome = retry(
            ctx,
            &self.retry,
            "set_iam_policy",
            ApiError::is_retryable,
            move |attempt| async move {
                let mut policy = self.get_policy(ctx, resource).await?;
                mutate(&mut policy);
                self.set_policy(ctx, resource, &policy).await?;
                debug!(attempt, target = %resource.target(), "policy written");
                Ok::<(), ApiError>(())
            },
        )
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(RetryError::Exhausted { attempts, last }) => Err(Error::PolicyPropagationFailed {
                target: resource.target(),
                resource: resource.location(),
                attempts,
                source: last,
            }),
            Err(RetryError::Fatal(e)) if e.is_not_found() => Err(match resource {
                PolicyResource::Object { bucket, object } => Error::not_found(bucket, object),
                PolicyResource::Secret { project, name } => Error::not_found(project, name),
                PolicyResource::Key(key) => Error::api("update policy on", key, e),
            }),
            Err(RetryError::Fatal(e)) => Err(Error::api(
                "update policy on",
                resource.location(),
                e,
            )),
            Err(RetryError::Cancelled) => Err(Error::Cancelled),
        }
    }
}
