//! # Constants
//!
//! Shared constants used throughout the crate.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Crate name reported in the user agent
pub const NAME: &str = "berglas";

/// Crate version reported in the user agent and by `berglas version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Project URL reported in the user agent
pub const PROJECT_URL: &str = "https://github.com/microscaler/berglas-rs";

/// Reference scheme for secrets stored in Cloud Storage
pub const STORAGE_SCHEME: &str = "berglas://";

/// Reference scheme for secrets stored in Secret Manager
pub const SECRET_MANAGER_SCHEME: &str = "sm://";

/// Object metadata key marking an object as a managed secret
pub const METADATA_ID_KEY: &str = "berglas-secret";

/// Value stored under [`METADATA_ID_KEY`]
pub const METADATA_ID_VALUE: &str = "1";

/// Object metadata key holding the (version-trimmed) KMS key name
pub const METADATA_KMS_KEY: &str = "berglas-kms-key";

/// Cache-Control applied to every secret object so nothing caches ciphertext
pub const CACHE_CONTROL: &str = "private, no-cache, no-store, no-transform, max-age=0";

/// Content type of the stored envelope
pub const ENVELOPE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Storage role granting read access to a single object
pub const ROLE_OBJECT_READER: &str = "roles/storage.legacyObjectReader";

/// KMS role granting decrypt on a crypto key
pub const ROLE_KEY_DECRYPTER: &str = "roles/cloudkms.cryptoKeyDecrypter";

/// Secret Manager role granting payload access
pub const ROLE_SECRET_ACCESSOR: &str = "roles/secretmanager.secretAccessor";

/// Default number of attempts for policy and environment retries
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default Fibonacci backoff base (milliseconds)
pub const DEFAULT_RETRY_BASE_MS: u64 = 250;

/// Default Fibonacci backoff cap (milliseconds)
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

/// Default HTTP request timeout (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default Cloud Storage endpoint
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Default Cloud KMS endpoint
pub const DEFAULT_KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com";

/// Default Secret Manager endpoint
pub const DEFAULT_SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";

/// GCE metadata server token endpoint (Workload Identity)
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Name of the version alias that always points at the newest Secret Manager version
pub const LATEST_VERSION: &str = "latest";

/// Exit code for upstream API failures
pub const API_EXIT_CODE: i32 = 60;

/// Exit code for caller misuse (bad references, missing fields)
pub const MISUSE_EXIT_CODE: i32 = 61;

/// User agent sent with every API request
#[must_use]
pub fn user_agent() -> String {
    format!("{NAME}/{VERSION} (+{PROJECT_URL})")
}
