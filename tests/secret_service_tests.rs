//! Secret service behaviour over the in-memory providers
//!
//! Covers the storage compare-and-swap rules, deletion of every generation,
//! policy convergence under conflicts and the Secret Manager flows.

mod common;

use berglas::constants::{ROLE_KEY_DECRYPTER, ROLE_OBJECT_READER, ROLE_SECRET_ACCESSOR};
use async_trait::async_trait;
use berglas::provider::memory::{FaultPoint, MemoryStorage};
use berglas::provider::{
    ApiError, BlobStore, KeyManagement, ObjectAttrs, ObjectQuery, ObjectWrite, Policy,
    SecretRegister,
};
use berglas::{
    AccessRequest, Client, Context, CreateRequest, DeleteRequest, Error, ErrorKind, GrantRequest,
    ListRequest, MigrateBucketRequest, MigrateRequest, ReadRequest, Reference, RevokeRequest,
    UpdateRequest,
};
use common::{harness, BUCKET, KEY, PROJECT};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const MEMBER: &str = "serviceAccount:app@test-project.iam.gserviceaccount.com";

fn create_storage(object: &str, plaintext: &[u8]) -> CreateRequest {
    CreateRequest::Storage {
        bucket: BUCKET.to_string(),
        object: object.to_string(),
        key: KEY.to_string(),
        plaintext: plaintext.to_vec(),
    }
}

fn access_storage(object: &str, generation: i64) -> AccessRequest {
    AccessRequest::Storage {
        bucket: BUCKET.to_string(),
        object: object.to_string(),
        generation,
    }
}

fn create_sm(name: &str, plaintext: &[u8]) -> CreateRequest {
    CreateRequest::SecretManager {
        project: PROJECT.to_string(),
        name: name.to_string(),
        plaintext: plaintext.to_vec(),
        locations: Vec::new(),
    }
}

// ============================================================================
// Storage create / access
// ============================================================================

#[tokio::test]
async fn test_storage_create_then_access_round_trip() {
    let h = harness();
    let ctx = Context::new();

    let secret = h
        .client
        .create(&ctx, create_storage("api-key", b"my secret data"))
        .await
        .unwrap();
    assert_eq!(secret.parent, BUCKET);
    assert_eq!(secret.name, "api-key");
    assert_eq!(secret.kms_key, KEY);
    assert!(secret.generation > 0);
    assert_eq!(secret.plaintext.as_deref(), Some(&b"my secret data"[..]));

    let plaintext = h
        .client
        .access(&ctx, access_storage("api-key", 0))
        .await
        .unwrap();
    assert_eq!(plaintext, b"my secret data");
}

#[tokio::test]
async fn test_storage_create_stores_only_ciphertext() {
    let h = harness();
    let ctx = Context::new();
    let secret = h
        .client
        .create(&ctx, create_storage("api-key", b"plaintext-marker"))
        .await
        .unwrap();

    let raw = h
        .storage
        .read_object(&ctx, BUCKET, "api-key", secret.generation)
        .await
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();
    assert!(!raw.contains("plaintext-marker"));
    assert_eq!(raw.split(':').count(), 2);

    let attrs = h
        .storage
        .object_attrs(&ctx, BUCKET, "api-key", None)
        .await
        .unwrap();
    assert!(attrs.is_secret());
    assert_eq!(attrs.kms_key(), Some(KEY));
}

#[tokio::test]
async fn test_storage_create_trims_key_version() {
    let h = harness();
    let ctx = Context::new();
    let secret = h
        .client
        .create(
            &ctx,
            CreateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "versioned".to_string(),
                key: format!("{KEY}/cryptoKeyVersions/3"),
                plaintext: b"x".to_vec(),
            },
        )
        .await
        .unwrap();
    assert_eq!(secret.kms_key, KEY);
}

#[tokio::test]
async fn test_storage_create_duplicate_already_exists() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("dup", b"one"))
        .await
        .unwrap();

    let err = h
        .client
        .create(&ctx, create_storage("dup", b"two"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(!err.is_misuse());

    // The original is untouched
    let plaintext = h.client.access(&ctx, access_storage("dup", 0)).await.unwrap();
    assert_eq!(plaintext, b"one");
}

#[tokio::test]
async fn test_storage_create_missing_fields_is_misuse() {
    let h = harness();
    let ctx = Context::new();
    let err = h
        .client
        .create(
            &ctx,
            CreateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "s".to_string(),
                key: String::new(),
                plaintext: b"x".to_vec(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingField);
    assert!(err.is_misuse());
}

#[tokio::test]
async fn test_storage_access_missing_is_not_found() {
    let h = harness();
    let err = h
        .client
        .access(&Context::new(), access_storage("missing", 0))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_storage_access_unmanaged_object_is_invalid() {
    let h = harness();
    h.storage
        .put_raw(BUCKET, "plain.txt", b"not a secret", BTreeMap::new());

    let err = h
        .client
        .access(&Context::new(), access_storage("plain.txt", 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSecret);
}

#[tokio::test]
async fn test_storage_ciphertext_bound_to_object_name() {
    let h = harness();
    let ctx = Context::new();
    let original = h
        .client
        .create(&ctx, create_storage("original", b"bound"))
        .await
        .unwrap();

    // Copy the envelope and metadata under a different name
    let raw = h
        .storage
        .read_object(&ctx, BUCKET, "original", original.generation)
        .await
        .unwrap();
    let attrs = h
        .storage
        .object_attrs(&ctx, BUCKET, "original", None)
        .await
        .unwrap();
    h.storage.put_raw(BUCKET, "copied", &raw, attrs.metadata);

    let err = h
        .client
        .access(&ctx, access_storage("copied", 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
}

#[tokio::test]
async fn test_storage_malformed_envelope() {
    let h = harness();
    let mut metadata = BTreeMap::new();
    metadata.insert("berglas-secret".to_string(), "1".to_string());
    metadata.insert("berglas-kms-key".to_string(), KEY.to_string());
    h.storage.put_raw(BUCKET, "broken", b"no-separator-here", metadata);

    let err = h
        .client
        .access(&Context::new(), access_storage("broken", 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedCiphertext);
}

// ============================================================================
// Storage update (compare-and-swap)
// ============================================================================

#[tokio::test]
async fn test_storage_stale_update_then_fresh_update() {
    let h = harness();
    let ctx = Context::new();

    let first = h
        .client
        .create(&ctx, create_storage("cas", b"v1"))
        .await
        .unwrap();
    let second = h
        .client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "cas".to_string(),
                generation: first.generation,
                metageneration: first.metageneration,
                key: None,
                plaintext: Some(b"v2".to_vec()),
                create_if_missing: false,
            },
        )
        .await
        .unwrap();
    assert_ne!(second.generation, first.generation);

    // A writer still holding the first generation loses
    let err = h
        .client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "cas".to_string(),
                generation: first.generation,
                metageneration: first.metageneration,
                key: None,
                plaintext: Some(b"stale".to_vec()),
                create_if_missing: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModifiedConcurrently);

    let third = h
        .client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "cas".to_string(),
                generation: second.generation,
                metageneration: second.metageneration,
                key: None,
                plaintext: Some(b"v3".to_vec()),
                create_if_missing: false,
            },
        )
        .await
        .unwrap();
    assert_ne!(third.generation, second.generation);

    let live = h.client.access(&ctx, access_storage("cas", 0)).await.unwrap();
    assert_eq!(live, b"v3");
    let pinned = h
        .client
        .access(&ctx, access_storage("cas", first.generation))
        .await
        .unwrap();
    assert_eq!(pinned, b"v1");
}

#[tokio::test]
async fn test_storage_update_without_plaintext_reencrypts() {
    let h = harness();
    let ctx = Context::new();
    let first = h
        .client
        .create(&ctx, create_storage("rotate", b"keep me"))
        .await
        .unwrap();

    let rotated = h
        .client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "rotate".to_string(),
                generation: 0,
                metageneration: 0,
                key: None,
                plaintext: None,
                create_if_missing: false,
            },
        )
        .await
        .unwrap();
    assert!(rotated.generation > first.generation);
    assert_eq!(rotated.plaintext.as_deref(), Some(&b"keep me"[..]));
}

#[tokio::test]
async fn test_storage_update_missing_without_create() {
    let h = harness();
    let err = h
        .client
        .update(
            &Context::new(),
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "absent".to_string(),
                generation: 0,
                metageneration: 0,
                key: Some(KEY.to_string()),
                plaintext: Some(b"x".to_vec()),
                create_if_missing: false,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_storage_update_create_if_missing() {
    let h = harness();
    let ctx = Context::new();
    let created = h
        .client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "fresh".to_string(),
                generation: 0,
                metageneration: 0,
                key: Some(KEY.to_string()),
                plaintext: Some(b"new".to_vec()),
                create_if_missing: true,
            },
        )
        .await
        .unwrap();
    assert!(created.generation > 0);

    let missing_key = h
        .client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "fresh-2".to_string(),
                generation: 0,
                metageneration: 0,
                key: None,
                plaintext: Some(b"new".to_vec()),
                create_if_missing: true,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(missing_key.kind(), ErrorKind::MissingField);
}

#[tokio::test]
async fn test_storage_update_preserves_access() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("shared", b"v1"))
        .await
        .unwrap();
    h.client
        .grant(
            &ctx,
            GrantRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "shared".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap();

    h.client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "shared".to_string(),
                generation: 0,
                metageneration: 0,
                key: None,
                plaintext: Some(b"v2".to_vec()),
                create_if_missing: false,
            },
        )
        .await
        .unwrap();

    let policy = h
        .storage
        .get_object_policy(&ctx, BUCKET, "shared")
        .await
        .unwrap();
    assert!(policy.has(ROLE_OBJECT_READER, MEMBER));
}

// ============================================================================
// Storage delete
// ============================================================================

#[tokio::test]
async fn test_storage_delete_removes_every_generation() {
    let h = harness();
    let ctx = Context::new();

    let mut generations = vec![h
        .client
        .create(&ctx, create_storage("multi", b"v1"))
        .await
        .unwrap()
        .generation];
    for payload in [&b"v2"[..], &b"v3"[..]] {
        let secret = h
            .client
            .update(
                &ctx,
                UpdateRequest::Storage {
                    bucket: BUCKET.to_string(),
                    object: "multi".to_string(),
                    generation: 0,
                    metageneration: 0,
                    key: None,
                    plaintext: Some(payload.to_vec()),
                    create_if_missing: false,
                },
            )
            .await
            .unwrap();
        generations.push(secret.generation);
    }

    let delete = || DeleteRequest::Storage {
        bucket: BUCKET.to_string(),
        object: "multi".to_string(),
    };
    h.client.delete(&ctx, delete()).await.unwrap();

    for generation in generations {
        let err = h
            .client
            .access(&ctx, access_storage("multi", generation))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "generation {generation} still readable");
    }
    assert!(h
        .client
        .access(&ctx, access_storage("multi", 0))
        .await
        .unwrap_err()
        .is_not_found());

    // Deleting again is fine
    h.client.delete(&ctx, delete()).await.unwrap();
}

#[tokio::test]
async fn test_storage_delete_does_not_touch_prefixed_names() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("db", b"a"))
        .await
        .unwrap();
    h.client
        .create(&ctx, create_storage("db-password", b"b"))
        .await
        .unwrap();

    h.client
        .delete(
            &ctx,
            DeleteRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "db".to_string(),
            },
        )
        .await
        .unwrap();

    let survivor = h
        .client
        .access(&ctx, access_storage("db-password", 0))
        .await
        .unwrap();
    assert_eq!(survivor, b"b");
}

#[tokio::test]
async fn test_storage_delete_stops_after_first_failure() {
    let h = harness();
    let ctx = Context::new();
    let client = h.client.clone().with_delete_workers(1);

    client
        .create(&ctx, create_storage("doomed", b"v1"))
        .await
        .unwrap();
    for payload in [&b"v2"[..], &b"v3"[..]] {
        client
            .update(
                &ctx,
                UpdateRequest::Storage {
                    bucket: BUCKET.to_string(),
                    object: "doomed".to_string(),
                    generation: 0,
                    metageneration: 0,
                    key: None,
                    plaintext: Some(payload.to_vec()),
                    create_if_missing: false,
                },
            )
            .await
            .unwrap();
    }

    h.storage.inject_fault(FaultPoint::DeleteObject, 500, 1);
    let err = client
        .delete(
            &ctx,
            DeleteRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "doomed".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Api);
    assert_eq!(h.storage.delete_calls(), 1);
}

/// Storage whose generation deletes all fail: `slow` after a delay, any
/// other generation at once
#[derive(Debug)]
struct FailingDeletes {
    inner: Arc<MemoryStorage>,
    slow: i64,
}

#[async_trait]
impl BlobStore for FailingDeletes {
    async fn object_attrs(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
        generation: Option<i64>,
    ) -> Result<ObjectAttrs, ApiError> {
        self.inner.object_attrs(ctx, bucket, name, generation).await
    }

    async fn read_object(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<Vec<u8>, ApiError> {
        self.inner.read_object(ctx, bucket, name, generation).await
    }

    async fn write_object(&self, ctx: &Context, write: &ObjectWrite) -> Result<ObjectAttrs, ApiError> {
        self.inner.write_object(ctx, write).await
    }

    async fn delete_object(
        &self,
        _ctx: &Context,
        _bucket: &str,
        _name: &str,
        generation: i64,
    ) -> Result<(), ApiError> {
        if generation == self.slow {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Err(ApiError::status("storage", 503, "UNAVAILABLE", "slow failure"));
        }
        Err(ApiError::status("storage", 500, "INTERNAL", "fast failure"))
    }

    async fn list_objects(
        &self,
        ctx: &Context,
        query: &ObjectQuery,
    ) -> Result<Vec<ObjectAttrs>, ApiError> {
        self.inner.list_objects(ctx, query).await
    }

    async fn get_object_policy(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
    ) -> Result<Policy, ApiError> {
        self.inner.get_object_policy(ctx, bucket, name).await
    }

    async fn set_object_policy(
        &self,
        ctx: &Context,
        bucket: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        self.inner.set_object_policy(ctx, bucket, name, policy).await
    }
}

#[tokio::test]
async fn test_storage_delete_reports_earliest_failure() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("split", b"v1"))
        .await
        .unwrap();
    h.client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "split".to_string(),
                generation: 0,
                metageneration: 0,
                key: None,
                plaintext: Some(b"v2".to_vec()),
                create_if_missing: false,
            },
        )
        .await
        .unwrap();

    let listed = h
        .client
        .list(
            &ctx,
            ListRequest::Storage {
                bucket: BUCKET.to_string(),
                prefix: Some("split".to_string()),
                generations: true,
            },
        )
        .await
        .unwrap();
    // newest first
    let (newest, oldest) = (listed.secrets[0].generation, listed.secrets[1].generation);

    // Both deletes run at once; the oldest generation fails last
    let storage = Arc::new(FailingDeletes {
        inner: Arc::clone(&h.storage),
        slow: oldest,
    });
    let client = Client::from_parts(
        Arc::clone(&h.kms) as _,
        storage as _,
        Arc::clone(&h.register) as _,
    )
    .with_delete_workers(2);

    let err = client
        .delete(
            &ctx,
            DeleteRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "split".to_string(),
            },
        )
        .await
        .unwrap_err();

    match err {
        Error::Api {
            location, source, ..
        } => {
            assert_eq!(location, format!("{BUCKET}/split#{newest}"));
            assert_eq!(source.code(), Some(500));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_storage_delete_cancelled_context() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("cancelled", b"v1"))
        .await
        .unwrap();

    ctx.cancel();
    let err = h
        .client
        .delete(
            &ctx,
            DeleteRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "cancelled".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.storage.delete_calls(), 0);
}

// ============================================================================
// Grant / revoke
// ============================================================================

#[tokio::test]
async fn test_storage_grant_and_revoke_converge() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("iam", b"v1"))
        .await
        .unwrap();

    // Two conflicting writers before the grant lands
    h.storage.inject_fault(FaultPoint::SetPolicy, 409, 2);
    h.client
        .grant(
            &ctx,
            GrantRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "iam".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap();

    let object_policy = h.storage.get_object_policy(&ctx, BUCKET, "iam").await.unwrap();
    assert!(object_policy.has(ROLE_OBJECT_READER, MEMBER));
    let key_policy = h.kms.get_key_policy(&ctx, KEY).await.unwrap();
    assert!(key_policy.has(ROLE_KEY_DECRYPTER, MEMBER));

    h.client
        .revoke(
            &ctx,
            RevokeRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "iam".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap();

    let object_policy = h.storage.get_object_policy(&ctx, BUCKET, "iam").await.unwrap();
    assert!(!object_policy.has(ROLE_OBJECT_READER, MEMBER));
    let key_policy = h.kms.get_key_policy(&ctx, KEY).await.unwrap();
    assert!(!key_policy.has(ROLE_KEY_DECRYPTER, MEMBER));
}

#[tokio::test]
async fn test_revoke_of_absent_member_is_noop() {
    let h = harness();
    let ctx = Context::new();
    h.client.create(&ctx, create_sm("quiet", b"v1")).await.unwrap();

    h.client
        .revoke(
            &ctx,
            RevokeRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "quiet".to_string(),
                members: vec!["user:nobody@example.com".to_string()],
            },
        )
        .await
        .unwrap();

    let policy = h
        .register
        .get_secret_policy(&ctx, PROJECT, "quiet")
        .await
        .unwrap();
    assert!(policy.members(ROLE_SECRET_ACCESSOR).is_empty());
}

#[tokio::test]
async fn test_grant_exhausts_retries() {
    let h = harness();
    let ctx = Context::new();
    h.client.create(&ctx, create_sm("contended", b"v1")).await.unwrap();

    h.register.inject_fault(FaultPoint::SetPolicy, 409, 5);
    let err = h
        .client
        .grant(
            &ctx,
            GrantRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "contended".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyPropagationFailed);
    assert!(!err.is_misuse());
}

#[tokio::test]
async fn test_grant_waits_out_policy_propagation() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("propagating", b"v1"))
        .await
        .unwrap();

    // A previous policy write is still propagating
    h.storage.inject_fault(FaultPoint::SetPolicy, 412, 1);
    h.kms.inject_fault(FaultPoint::SetPolicy, 412, 1);
    h.client
        .grant(
            &ctx,
            GrantRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "propagating".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap();

    let object_policy = h
        .storage
        .get_object_policy(&ctx, BUCKET, "propagating")
        .await
        .unwrap();
    assert!(object_policy.has(ROLE_OBJECT_READER, MEMBER));
    let key_policy = h.kms.get_key_policy(&ctx, KEY).await.unwrap();
    assert!(key_policy.has(ROLE_KEY_DECRYPTER, MEMBER));
}

#[tokio::test]
async fn test_revoke_fails_when_policy_never_settles() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("unsettled", b"v1"))
        .await
        .unwrap();
    h.client
        .grant(
            &ctx,
            GrantRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "unsettled".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap();

    h.storage.inject_fault(FaultPoint::SetPolicy, 412, 5);
    let err = h
        .client
        .revoke(
            &ctx,
            RevokeRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "unsettled".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyPropagationFailed);

    let object_policy = h
        .storage
        .get_object_policy(&ctx, BUCKET, "unsettled")
        .await
        .unwrap();
    assert!(object_policy.has(ROLE_OBJECT_READER, MEMBER));
}

#[tokio::test]
async fn test_grant_permission_denied_is_not_retried() {
    let h = harness();
    let ctx = Context::new();
    h.client.create(&ctx, create_sm("locked", b"v1")).await.unwrap();

    // One 403 followed by a would-be conflict: the conflict is never reached
    h.register.inject_fault(FaultPoint::SetPolicy, 403, 1);
    h.register.inject_fault(FaultPoint::SetPolicy, 409, 1);
    let err = h
        .client
        .grant(
            &ctx,
            GrantRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "locked".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Api);
}

#[tokio::test]
async fn test_grant_missing_secret_is_not_found() {
    let h = harness();
    let err = h
        .client
        .grant(
            &Context::new(),
            GrantRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "ghost".to_string(),
                members: vec![MEMBER.to_string()],
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Secret Manager
// ============================================================================

#[tokio::test]
async fn test_secret_manager_create_read_update() {
    let h = harness();
    let ctx = Context::new();

    let created = h
        .client
        .create(
            &ctx,
            CreateRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "token".to_string(),
                plaintext: b"one".to_vec(),
                locations: vec!["us-west1".to_string(), "europe-west1".to_string()],
            },
        )
        .await
        .unwrap();
    assert_eq!(created.version, "1");
    assert_eq!(created.locations, vec!["europe-west1", "us-west1"]);

    let updated = h
        .client
        .update(
            &ctx,
            UpdateRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "token".to_string(),
                plaintext: Some(b"two".to_vec()),
                locations: Vec::new(),
                create_if_missing: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, "2");

    let latest = h
        .client
        .read(
            &ctx,
            ReadRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "token".to_string(),
                version: String::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(latest.version, "2");
    assert_eq!(latest.plaintext.as_deref(), Some(&b"two"[..]));

    let pinned = h
        .client
        .access(
            &ctx,
            AccessRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "token".to_string(),
                version: "1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(pinned, b"one");
}

#[tokio::test]
async fn test_secret_manager_duplicate_and_bad_name() {
    let h = harness();
    let ctx = Context::new();
    h.client.create(&ctx, create_sm("dup", b"x")).await.unwrap();

    let err = h.client.create(&ctx, create_sm("dup", b"y")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let err = h
        .client
        .create(&ctx, create_sm("nested/name", b"y"))
        .await
        .unwrap_err();
    assert!(err.is_misuse());
}

#[tokio::test]
async fn test_secret_manager_update_create_if_missing() {
    let h = harness();
    let ctx = Context::new();
    let request = |create_if_missing| UpdateRequest::SecretManager {
        project: PROJECT.to_string(),
        name: "later".to_string(),
        plaintext: Some(b"v".to_vec()),
        locations: Vec::new(),
        create_if_missing,
    };

    let err = h.client.update(&ctx, request(false)).await.unwrap_err();
    assert!(err.is_not_found());

    let created = h.client.update(&ctx, request(true)).await.unwrap();
    assert_eq!(created.version, "1");
}

#[tokio::test]
async fn test_secret_manager_delete_version_then_secret() {
    let h = harness();
    let ctx = Context::new();
    h.client.create(&ctx, create_sm("gone", b"v1")).await.unwrap();
    h.client
        .update(
            &ctx,
            UpdateRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "gone".to_string(),
                plaintext: Some(b"v2".to_vec()),
                locations: Vec::new(),
                create_if_missing: false,
            },
        )
        .await
        .unwrap();

    h.client
        .delete(
            &ctx,
            DeleteRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "gone".to_string(),
                version: Some("2".to_string()),
            },
        )
        .await
        .unwrap();
    let latest = h
        .client
        .access(
            &ctx,
            AccessRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "gone".to_string(),
                version: String::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(latest, b"v1");

    let delete = || DeleteRequest::SecretManager {
        project: PROJECT.to_string(),
        name: "gone".to_string(),
        version: None,
    };
    h.client.delete(&ctx, delete()).await.unwrap();
    h.client.delete(&ctx, delete()).await.unwrap();

    assert!(h.register.get_secret(&ctx, PROJECT, "gone").await.is_err());
}

// ============================================================================
// List and migrate
// ============================================================================

#[tokio::test]
async fn test_storage_list_skips_unmanaged_and_sorts() {
    let h = harness();
    let ctx = Context::new();
    h.client.create(&ctx, create_storage("b", b"1")).await.unwrap();
    h.client.create(&ctx, create_storage("a", b"1")).await.unwrap();
    h.client
        .update(
            &ctx,
            UpdateRequest::Storage {
                bucket: BUCKET.to_string(),
                object: "a".to_string(),
                generation: 0,
                metageneration: 0,
                key: None,
                plaintext: Some(b"2".to_vec()),
                create_if_missing: false,
            },
        )
        .await
        .unwrap();
    h.storage.put_raw(BUCKET, "readme.txt", b"hi", BTreeMap::new());

    let live = h
        .client
        .list(
            &ctx,
            ListRequest::Storage {
                bucket: BUCKET.to_string(),
                prefix: None,
                generations: false,
            },
        )
        .await
        .unwrap();
    let names: Vec<&str> = live.secrets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert!(live.secrets.iter().all(|s| s.plaintext.is_none()));

    let all = h
        .client
        .list(
            &ctx,
            ListRequest::Storage {
                bucket: BUCKET.to_string(),
                prefix: Some("a".to_string()),
                generations: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(all.secrets.len(), 2);
    assert!(all.secrets[0].generation > all.secrets[1].generation);
}

#[tokio::test]
async fn test_secret_manager_list_versions_newest_first() {
    let h = harness();
    let ctx = Context::new();
    h.client.create(&ctx, create_sm("app-db", b"1")).await.unwrap();
    h.client.create(&ctx, create_sm("other", b"1")).await.unwrap();
    for _ in 0..10 {
        h.client
            .update(
                &ctx,
                UpdateRequest::SecretManager {
                    project: PROJECT.to_string(),
                    name: "app-db".to_string(),
                    plaintext: Some(b"n".to_vec()),
                    locations: Vec::new(),
                    create_if_missing: false,
                },
            )
            .await
            .unwrap();
    }

    let listed = h
        .client
        .list(
            &ctx,
            ListRequest::SecretManager {
                project: PROJECT.to_string(),
                prefix: Some("app-".to_string()),
                versions: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(listed.secrets.len(), 11);
    assert_eq!(listed.secrets[0].version, "11");
    assert_eq!(listed.secrets[1].version, "10");
    assert!(listed.secrets.iter().all(|s| s.name == "app-db"));
}

fn migrate_object(object: &str) -> MigrateRequest {
    MigrateRequest {
        bucket: BUCKET.to_string(),
        object: object.to_string(),
        project: PROJECT.to_string(),
        name: None,
        locations: Vec::new(),
    }
}

async fn access_sm(h: &common::Harness, name: &str) -> Vec<u8> {
    h.client
        .access(
            &Context::new(),
            AccessRequest::SecretManager {
                project: PROJECT.to_string(),
                name: name.to_string(),
                version: String::new(),
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_migrate_storage_to_secret_manager() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("legacy", b"moved"))
        .await
        .unwrap();

    let migrated = h
        .client
        .migrate(&ctx, migrate_object("legacy"))
        .await
        .unwrap()
        .expect("non-empty secret is migrated");
    assert_eq!(migrated.name, "legacy");
    assert_eq!(migrated.version, "1");

    assert_eq!(access_sm(&h, "legacy").await, b"moved");
}

#[tokio::test]
async fn test_migrate_nested_object_flattens_name() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("app/db", b"nested"))
        .await
        .unwrap();

    let migrated = h
        .client
        .migrate(&ctx, migrate_object("app/db"))
        .await
        .unwrap()
        .expect("non-empty secret is migrated");
    assert_eq!(migrated.name, "app_db");

    // The target must be addressable through the sm:// grammar
    let reference = Reference::parse(&format!("sm://{PROJECT}/{}", migrated.name)).unwrap();
    let plaintext = h
        .client
        .access(&ctx, AccessRequest::from(&reference))
        .await
        .unwrap();
    assert_eq!(plaintext, b"nested");
    assert!(h.register.get_secret(&ctx, PROJECT, "app/db").await.is_err());
}

#[tokio::test]
async fn test_migrate_rejects_hierarchical_target_name() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("flat", b"v1"))
        .await
        .unwrap();

    let err = h
        .client
        .migrate(
            &ctx,
            MigrateRequest {
                name: Some("team/flat".to_string()),
                ..migrate_object("flat")
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(h.register.get_secret(&ctx, PROJECT, "team/flat").await.is_err());
}

#[tokio::test]
async fn test_secret_manager_update_rejects_slash_in_name() {
    let h = harness();
    let ctx = Context::new();

    let err = h
        .client
        .update(
            &ctx,
            UpdateRequest::SecretManager {
                project: PROJECT.to_string(),
                name: "a/b".to_string(),
                plaintext: Some(b"v1".to_vec()),
                locations: Vec::new(),
                create_if_missing: true,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(err.is_misuse());
    assert!(h.register.get_secret(&ctx, PROJECT, "a/b").await.is_err());
}

#[tokio::test]
async fn test_migrate_bucket_skips_empty_plaintext() {
    let h = harness();
    let ctx = Context::new();
    h.client
        .create(&ctx, create_storage("api-key", b"k"))
        .await
        .unwrap();
    h.client
        .create(&ctx, create_storage("app/db", b"d"))
        .await
        .unwrap();
    h.client
        .create(&ctx, create_storage("empty", b""))
        .await
        .unwrap();
    h.storage.put_raw(BUCKET, "readme.txt", b"hi", BTreeMap::new());

    let report = h
        .client
        .migrate_bucket(
            &ctx,
            MigrateBucketRequest {
                bucket: BUCKET.to_string(),
                project: PROJECT.to_string(),
                locations: Vec::new(),
            },
        )
        .await
        .unwrap();

    let migrated: Vec<(&str, &str)> = report
        .migrated
        .iter()
        .map(|(source, secret)| (source.as_str(), secret.name.as_str()))
        .collect();
    assert_eq!(migrated, vec![("api-key", "api-key"), ("app/db", "app_db")]);
    assert_eq!(report.skipped, vec!["empty".to_string()]);

    assert_eq!(access_sm(&h, "api-key").await, b"k");
    assert_eq!(access_sm(&h, "app_db").await, b"d");
    assert!(h.register.get_secret(&ctx, PROJECT, "empty").await.is_err());
}
