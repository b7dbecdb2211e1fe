//! Common test utilities
//!
//! Provides rustls setup for the Pact tests, clients wired to Pact mock
//! servers, and a secret service backed by the in-memory providers.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use berglas::provider::gcp::{KmsREST, RestTransport, SecretManagerREST, StorageREST};
use berglas::provider::memory::{MemoryKms, MemoryRegister, MemoryStorage};
use berglas::{Client, ClientConfig, RetryPolicy};
use std::sync::{Arc, Once};
use std::time::Duration;

static RUSTLS_INIT: Once = Once::new();

pub const BUCKET: &str = "test-bucket";
pub const PROJECT: &str = "test-project";
pub const KEY: &str = "projects/test-project/locations/global/keyRings/berglas/cryptoKeys/berglas-key";

/// Initialize rustls crypto provider for tests
///
/// Must run before the Pact mock server starts. Uses a `Once` to ensure
/// it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            // Another thread may win the install; either provider is ring.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
    });
}

/// Mock server base URL without the trailing slash
pub fn base_url(url: impl std::fmt::Display) -> String {
    let mut base = url.to_string();
    if base.ends_with('/') {
        base.pop();
    }
    base
}

/// Transport using the fixed token the contracts expect
pub async fn transport() -> RestTransport {
    let config = ClientConfig {
        access_token: Some("test-token".to_string()),
        ..ClientConfig::default()
    };
    RestTransport::new(&config)
        .await
        .expect("Failed to create transport")
}

pub async fn storage_client(base: &str) -> StorageREST {
    StorageREST::new(transport().await, base)
}

pub async fn kms_client(base: &str) -> KmsREST {
    KmsREST::new(transport().await, base)
}

pub async fn secret_manager_client(base: &str) -> SecretManagerREST {
    SecretManagerREST::new(transport().await, base)
}

/// Retry schedule short enough for tests
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 5,
        base: Duration::from_millis(1),
        max: Duration::from_millis(5),
    }
}

/// Secret service over in-memory providers, with handles for inspection
pub struct Harness {
    pub kms: Arc<MemoryKms>,
    pub storage: Arc<MemoryStorage>,
    pub register: Arc<MemoryRegister>,
    pub client: Client,
}

/// In-memory harness with [`BUCKET`] and [`KEY`] provisioned
pub fn harness() -> Harness {
    let kms = Arc::new(MemoryKms::new());
    kms.create_key(KEY);
    let storage = Arc::new(MemoryStorage::new());
    storage.create_bucket(BUCKET);
    let register = Arc::new(MemoryRegister::new());

    let client = Client::from_parts(
        Arc::clone(&kms) as _,
        Arc::clone(&storage) as _,
        Arc::clone(&register) as _,
    )
    .with_retry_policy(fast_retry());

    Harness {
        kms,
        storage,
        register,
        client,
    }
}
