//! # In-Memory Providers
//!
//! Process-local implementations of [`KeyManagement`], [`BlobStore`] and
//! [`SecretRegister`]. They honour the same contracts as the Google services:
//! monotonically increasing generations, exact-match preconditions, etag
//! checked policy writes, AAD-bound key encryption and auto-incrementing
//! register versions.
//!
//! Faults can be injected per call site to exercise retry and cancellation
//! paths.
//!
//! This is ephemeral - data does not persist across restarts.

use super::{
    ApiError, BlobStore, KeyManagement, ObjectAttrs, ObjectQuery, ObjectWrite, Policy,
    Precondition, RegisterSecret, RegisterVersion, Replication, SecretRegister, VersionState,
};
use crate::constants::LATEST_VERSION;
use crate::context::Context;
use crate::crypto::{trim_key_version, DataKey, NONCE_SIZE};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Call sites that accept injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Any policy write (object, key or secret)
    SetPolicy,
    /// Any policy read
    GetPolicy,
    /// Object generation delete
    DeleteObject,
    /// Object listing
    ListObjects,
}

#[derive(Debug, Default)]
struct Faults {
    queued: Mutex<HashMap<FaultPoint, VecDeque<u16>>>,
}

impl Faults {
    fn inject(&self, point: FaultPoint, code: u16, times: usize) {
        let mut queued = lock(&self.queued);
        let queue = queued.entry(point).or_default();
        queue.extend(std::iter::repeat(code).take(times));
    }

    fn take(&self, point: FaultPoint, service: &'static str) -> Result<(), ApiError> {
        let code = lock(&self.queued)
            .get_mut(&point)
            .and_then(VecDeque::pop_front);
        match code {
            Some(code) => {
                debug!(?point, code, "injecting fault");
                Err(ApiError::status(
                    service,
                    code,
                    super::canonical_status(code),
                    format!("injected {point:?} failure"),
                ))
            }
            None => Ok(()),
        }
    }
}

fn next_etag(policy: &Policy) -> String {
    let current = policy
        .etag
        .as_deref()
        .and_then(|e| e.parse::<u64>().ok())
        .unwrap_or(0);
    (current + 1).to_string()
}

/// Apply `incoming` over `current` if its etag matches, returning the stored policy
fn write_policy(
    service: &'static str,
    current: &mut Policy,
    incoming: &Policy,
) -> Result<Policy, ApiError> {
    if let Some(etag) = &incoming.etag {
        if current.etag.as_ref().is_some_and(|c| c != etag) {
            return Err(ApiError::status(
                service,
                409,
                "ABORTED",
                "There were concurrent policy changes",
            ));
        }
    }
    let mut stored = incoming.clone();
    stored.etag = Some(next_etag(current));
    stored.version = Some(1);
    *current = stored.clone();
    Ok(stored)
}

fn seeded_policy() -> Policy {
    Policy {
        etag: Some("1".to_string()),
        version: Some(1),
        ..Policy::default()
    }
}

// ============================================================================
// Key management
// ============================================================================

struct KeyEntry {
    material: DataKey,
    policy: Policy,
}

/// In-memory KMS
#[derive(Default)]
pub struct MemoryKms {
    keys: Mutex<HashMap<String, KeyEntry>>,
    faults: Faults,
}

impl std::fmt::Debug for MemoryKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKms")
            .field("keys", &lock(&self.keys).len())
            .finish_non_exhaustive()
    }
}

impl MemoryKms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a crypto key; versioned names resolve to the same key
    pub fn create_key(&self, name: &str) {
        lock(&self.keys)
            .entry(trim_key_version(name).to_string())
            .or_insert_with(|| KeyEntry {
                material: crate::crypto::generate_dek(),
                policy: seeded_policy(),
            });
    }

    /// Fail the next `times` calls at `point` with HTTP `code`
    pub fn inject_fault(&self, point: FaultPoint, code: u16, times: usize) {
        self.faults.inject(point, code, times);
    }

    fn cipher(&self, key: &str) -> Result<Aes256Gcm, ApiError> {
        let keys = lock(&self.keys);
        let entry = keys
            .get(trim_key_version(key))
            .ok_or_else(|| key_not_found(key))?;
        Aes256Gcm::new_from_slice(entry.material.as_slice()).map_err(|e| ApiError::Decode {
            service: "kms",
            message: e.to_string(),
        })
    }
}

fn key_not_found(key: &str) -> ApiError {
    ApiError::status("kms", 404, "NOT_FOUND", format!("CryptoKey {key} not found."))
}

#[async_trait]
impl KeyManagement for MemoryKms {
    async fn encrypt(
        &self,
        _ctx: &Context,
        key: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ApiError> {
        let cipher = self.cipher(key)?;
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| ApiError::status("kms", 400, "INVALID_ARGUMENT", e.to_string()))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn decrypt(
        &self,
        _ctx: &Context,
        key: &str,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ApiError> {
        let cipher = self.cipher(key)?;
        let rejected = || {
            ApiError::status(
                "kms",
                400,
                "INVALID_ARGUMENT",
                "Decryption failed: verify that 'name' refers to the correct CryptoKey.",
            )
        };
        if ciphertext.len() < NONCE_SIZE {
            return Err(rejected());
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|e| {
                debug!(error = %e, "kms authentication failed");
                rejected()
            })
    }

    async fn get_key_policy(&self, _ctx: &Context, key: &str) -> Result<Policy, ApiError> {
        self.faults.take(FaultPoint::GetPolicy, "kms")?;
        lock(&self.keys)
            .get(trim_key_version(key))
            .map(|entry| entry.policy.clone())
            .ok_or_else(|| key_not_found(key))
    }

    async fn set_key_policy(
        &self,
        _ctx: &Context,
        key: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        self.faults.take(FaultPoint::SetPolicy, "kms")?;
        let mut keys = lock(&self.keys);
        let entry = keys
            .get_mut(trim_key_version(key))
            .ok_or_else(|| key_not_found(key))?;
        write_policy("kms", &mut entry.policy, policy)
    }
}

// ============================================================================
// Blob storage
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    attrs: ObjectAttrs,
    data: Vec<u8>,
    policy: Policy,
}

#[derive(Debug, Default)]
struct ObjectHistory {
    generations: BTreeMap<i64, StoredObject>,
    live: Option<i64>,
}

impl ObjectHistory {
    fn live(&self) -> Option<&StoredObject> {
        self.live.and_then(|g| self.generations.get(&g))
    }
}

#[derive(Debug, Default)]
struct StorageState {
    buckets: HashMap<String, BTreeMap<String, ObjectHistory>>,
    next_generation: i64,
}

/// In-memory versioned bucket store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
    faults: Faults,
    deletes: AtomicUsize,
}

fn object_not_found(bucket: &str, name: &str) -> ApiError {
    ApiError::status(
        "storage",
        404,
        "NOT_FOUND",
        format!("No such object: {bucket}/{name}"),
    )
}

fn bucket_not_found(bucket: &str) -> ApiError {
    ApiError::status(
        "storage",
        404,
        "NOT_FOUND",
        format!("The specified bucket does not exist: {bucket}"),
    )
}

fn precondition_failed() -> ApiError {
    ApiError::status(
        "storage",
        412,
        "FAILED_PRECONDITION",
        "At least one of the pre-conditions you specified did not hold.",
    )
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bucket
    pub fn create_bucket(&self, bucket: &str) {
        lock(&self.state)
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// Fail the next `times` calls at `point` with HTTP `code`
    pub fn inject_fault(&self, point: FaultPoint, code: u16, times: usize) {
        self.faults.inject(point, code, times);
    }

    /// Number of generation deletes attempted so far
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Store raw bytes as a new generation without preconditions
    ///
    /// Used to seed objects that were not written through the secret service.
    pub fn put_raw(
        &self,
        bucket: &str,
        name: &str,
        data: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> ObjectAttrs {
        let mut state = lock(&self.state);
        state.next_generation += 1;
        let generation = state.next_generation;
        let attrs = ObjectAttrs {
            bucket: bucket.to_string(),
            name: name.to_string(),
            generation,
            metageneration: 1,
            metadata,
            updated: Some(Utc::now()),
            size: data.len() as u64,
        };
        let history = state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default();
        history.generations.insert(
            generation,
            StoredObject {
                attrs: attrs.clone(),
                data: data.to_vec(),
                policy: seeded_policy(),
            },
        );
        history.live = Some(generation);
        attrs
    }
}

#[async_trait]
impl BlobStore for MemoryStorage {
    async fn object_attrs(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        generation: Option<i64>,
    ) -> Result<ObjectAttrs, ApiError> {
        let state = lock(&self.state);
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        let history = objects
            .get(name)
            .ok_or_else(|| object_not_found(bucket, name))?;
        let stored = match generation {
            Some(g) => history.generations.get(&g),
            None => history.live(),
        };
        stored
            .map(|s| s.attrs.clone())
            .ok_or_else(|| object_not_found(bucket, name))
    }

    async fn read_object(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<Vec<u8>, ApiError> {
        let state = lock(&self.state);
        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(name))
            .and_then(|history| history.generations.get(&generation))
            .map(|s| s.data.clone())
            .ok_or_else(|| object_not_found(bucket, name))
    }

    async fn write_object(
        &self,
        _ctx: &Context,
        write: &ObjectWrite,
    ) -> Result<ObjectAttrs, ApiError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let objects = state
            .buckets
            .get_mut(&write.bucket)
            .ok_or_else(|| bucket_not_found(&write.bucket))?;

        let live = objects.get(&write.name).and_then(ObjectHistory::live);
        match (write.precondition, live) {
            (Precondition::DoesNotExist, Some(_)) | (Precondition::Match { .. }, None) => {
                return Err(precondition_failed());
            }
            (
                Precondition::Match {
                    generation,
                    metageneration,
                },
                Some(current),
            ) if current.attrs.generation != generation
                || current.attrs.metageneration != metageneration =>
            {
                return Err(precondition_failed());
            }
            _ => {}
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let attrs = ObjectAttrs {
            bucket: write.bucket.clone(),
            name: write.name.clone(),
            generation,
            metageneration: 1,
            metadata: write.metadata.clone(),
            updated: Some(Utc::now()),
            size: write.data.len() as u64,
        };
        let history = objects.entry(write.name.clone()).or_default();
        history.generations.insert(
            generation,
            StoredObject {
                attrs: attrs.clone(),
                data: write.data.clone(),
                // A new generation starts with an empty policy
                policy: seeded_policy(),
            },
        );
        history.live = Some(generation);
        debug!(bucket = %write.bucket, name = %write.name, generation, "stored object");
        Ok(attrs)
    }

    async fn delete_object(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<(), ApiError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.faults.take(FaultPoint::DeleteObject, "storage")?;

        let mut state = lock(&self.state);
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        let history = objects
            .get_mut(name)
            .ok_or_else(|| object_not_found(bucket, name))?;
        if history.generations.remove(&generation).is_none() {
            return Err(object_not_found(bucket, name));
        }
        if history.live == Some(generation) {
            history.live = None;
        }
        if history.generations.is_empty() {
            objects.remove(name);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        _ctx: &Context,
        query: &ObjectQuery,
    ) -> Result<Vec<ObjectAttrs>, ApiError> {
        self.faults.take(FaultPoint::ListObjects, "storage")?;
        let state = lock(&self.state);
        let objects = state
            .buckets
            .get(&query.bucket)
            .ok_or_else(|| bucket_not_found(&query.bucket))?;

        let prefix = query.prefix.as_deref().unwrap_or("");
        let mut out = Vec::new();
        for (name, history) in objects.range(prefix.to_string()..) {
            if !name.starts_with(prefix) {
                break;
            }
            if query.versions {
                out.extend(history.generations.values().map(|s| s.attrs.clone()));
            } else if let Some(live) = history.live() {
                out.push(live.attrs.clone());
            }
        }
        Ok(out)
    }

    async fn get_object_policy(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
    ) -> Result<Policy, ApiError> {
        self.faults.take(FaultPoint::GetPolicy, "storage")?;
        let state = lock(&self.state);
        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(name))
            .and_then(ObjectHistory::live)
            .map(|s| s.policy.clone())
            .ok_or_else(|| object_not_found(bucket, name))
    }

    async fn set_object_policy(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        self.faults.take(FaultPoint::SetPolicy, "storage")?;
        let mut state = lock(&self.state);
        let history = state
            .buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(name))
            .ok_or_else(|| object_not_found(bucket, name))?;
        let live = history
            .live
            .and_then(|g| history.generations.get_mut(&g))
            .ok_or_else(|| object_not_found(bucket, name))?;
        write_policy("storage", &mut live.policy, policy)
    }
}

// ============================================================================
// Secret register
// ============================================================================

#[derive(Debug)]
struct RegisterEntry {
    secret: RegisterSecret,
    versions: Vec<(RegisterVersion, Option<Vec<u8>>)>,
    policy: Policy,
}

impl RegisterEntry {
    fn find(&self, version: &str) -> Option<&(RegisterVersion, Option<Vec<u8>>)> {
        if version == LATEST_VERSION {
            self.versions
                .iter()
                .rev()
                .find(|(v, _)| v.state == VersionState::Enabled)
        } else {
            self.versions.iter().find(|(v, _)| v.version == version)
        }
    }
}

/// In-memory secret register
#[derive(Default)]
pub struct MemoryRegister {
    secrets: Mutex<BTreeMap<(String, String), RegisterEntry>>,
    faults: Faults,
}

impl std::fmt::Debug for MemoryRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegister")
            .field("secrets", &lock(&self.secrets).len())
            .finish_non_exhaustive()
    }
}

fn secret_not_found(project: &str, name: &str) -> ApiError {
    ApiError::status(
        "secretmanager",
        404,
        "NOT_FOUND",
        format!("Secret [projects/{project}/secrets/{name}] not found."),
    )
}

fn version_not_found(project: &str, name: &str, version: &str) -> ApiError {
    ApiError::status(
        "secretmanager",
        404,
        "NOT_FOUND",
        format!("Secret Version [projects/{project}/secrets/{name}/versions/{version}] not found."),
    )
}

fn key(project: &str, name: &str) -> (String, String) {
    (project.to_string(), name.to_string())
}

impl MemoryRegister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls at `point` with HTTP `code`
    pub fn inject_fault(&self, point: FaultPoint, code: u16, times: usize) {
        self.faults.inject(point, code, times);
    }
}

#[async_trait]
impl SecretRegister for MemoryRegister {
    async fn create_secret(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        replication: &Replication,
    ) -> Result<RegisterSecret, ApiError> {
        let mut secrets = lock(&self.secrets);
        if secrets.contains_key(&key(project, name)) {
            return Err(ApiError::status(
                "secretmanager",
                409,
                "ALREADY_EXISTS",
                format!("Secret [projects/{project}/secrets/{name}] already exists."),
            ));
        }
        let secret = RegisterSecret {
            project: project.to_string(),
            name: name.to_string(),
            replication: replication.clone(),
            create_time: Some(Utc::now()),
        };
        secrets.insert(
            key(project, name),
            RegisterEntry {
                secret: secret.clone(),
                versions: Vec::new(),
                policy: seeded_policy(),
            },
        );
        Ok(secret)
    }

    async fn get_secret(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<RegisterSecret, ApiError> {
        lock(&self.secrets)
            .get(&key(project, name))
            .map(|entry| entry.secret.clone())
            .ok_or_else(|| secret_not_found(project, name))
    }

    async fn add_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<RegisterVersion, ApiError> {
        let mut secrets = lock(&self.secrets);
        let entry = secrets
            .get_mut(&key(project, name))
            .ok_or_else(|| secret_not_found(project, name))?;
        let locations = match &entry.secret.replication {
            Replication::Automatic => Vec::new(),
            Replication::UserManaged(locations) => locations.clone(),
        };
        let version = RegisterVersion {
            project: project.to_string(),
            name: name.to_string(),
            version: (entry.versions.len() + 1).to_string(),
            state: VersionState::Enabled,
            create_time: Some(Utc::now()),
            locations,
        };
        entry.versions.push((version.clone(), Some(payload.to_vec())));
        Ok(version)
    }

    async fn get_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<RegisterVersion, ApiError> {
        let secrets = lock(&self.secrets);
        let entry = secrets
            .get(&key(project, name))
            .ok_or_else(|| secret_not_found(project, name))?;
        entry
            .find(version)
            .map(|(v, _)| v.clone())
            .ok_or_else(|| version_not_found(project, name, version))
    }

    async fn access_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let secrets = lock(&self.secrets);
        let entry = secrets
            .get(&key(project, name))
            .ok_or_else(|| secret_not_found(project, name))?;
        let (meta, payload) = entry
            .find(version)
            .ok_or_else(|| version_not_found(project, name, version))?;
        match (meta.state, payload) {
            (VersionState::Enabled, Some(payload)) => Ok(payload.clone()),
            _ => Err(ApiError::status(
                "secretmanager",
                400,
                "FAILED_PRECONDITION",
                format!(
                    "Secret Version [projects/{project}/secrets/{name}/versions/{}] is in {:?} state.",
                    meta.version, meta.state
                ),
            )),
        }
    }

    async fn list_secrets(
        &self,
        _ctx: &Context,
        project: &str,
    ) -> Result<Vec<RegisterSecret>, ApiError> {
        Ok(lock(&self.secrets)
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, entry)| entry.secret.clone())
            .collect())
    }

    async fn list_versions(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<Vec<RegisterVersion>, ApiError> {
        let secrets = lock(&self.secrets);
        let entry = secrets
            .get(&key(project, name))
            .ok_or_else(|| secret_not_found(project, name))?;
        // Newest first, matching the service
        Ok(entry.versions.iter().rev().map(|(v, _)| v.clone()).collect())
    }

    async fn destroy_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<(), ApiError> {
        let mut secrets = lock(&self.secrets);
        let entry = secrets
            .get_mut(&key(project, name))
            .ok_or_else(|| secret_not_found(project, name))?;
        let slot = entry
            .versions
            .iter_mut()
            .find(|(v, _)| v.version == version)
            .ok_or_else(|| version_not_found(project, name, version))?;
        slot.0.state = VersionState::Destroyed;
        slot.1 = None;
        Ok(())
    }

    async fn delete_secret(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        lock(&self.secrets)
            .remove(&key(project, name))
            .map(|_| ())
            .ok_or_else(|| secret_not_found(project, name))
    }

    async fn get_secret_policy(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<Policy, ApiError> {
        self.faults.take(FaultPoint::GetPolicy, "secretmanager")?;
        lock(&self.secrets)
            .get(&key(project, name))
            .map(|entry| entry.policy.clone())
            .ok_or_else(|| secret_not_found(project, name))
    }

    async fn set_secret_policy(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        self.faults.take(FaultPoint::SetPolicy, "secretmanager")?;
        let mut secrets = lock(&self.secrets);
        let entry = secrets
            .get_mut(&key(project, name))
            .ok_or_else(|| secret_not_found(project, name))?;
        write_policy("secretmanager", &mut entry.policy, policy)
    }
}
