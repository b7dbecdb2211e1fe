//! # Berglas
//!
//! Store and retrieve secrets on Google Cloud.
//!
//! ## Overview
//!
//! Two storage backends are supported:
//!
//! 1. **Cloud Storage** - each secret is an object holding an envelope: the
//!    payload sealed with a fresh AES-256-GCM data key, and that data key
//!    wrapped by a Cloud KMS crypto key. Updates use generation and
//!    metageneration preconditions so concurrent writers never clobber each
//!    other.
//! 2. **Secret Manager** - each secret is a Secret Manager secret whose
//!    versions form an append-only history.
//!
//! Secrets are addressed by references (`berglas://bucket/object`,
//! `sm://project/name`) which can be resolved to plaintext or written to a
//! file, and [`auto::import`] swaps every reference in the environment for
//! its value.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn run() -> berglas::Result<()> {
//! use berglas::{AccessRequest, Client, ClientConfig, Context};
//!
//! let client = Client::new(&ClientConfig::from_env()).await?;
//! let ctx = Context::new();
//! let plaintext = client
//!     .access(
//!         &ctx,
//!         AccessRequest::SecretManager {
//!             project: "my-project".to_string(),
//!             name: "api-key".to_string(),
//!             version: String::new(),
//!         },
//!     )
//!     .await?;
//! # let _ = plaintext;
//! # Ok(())
//! # }
//! ```

pub mod auto;
pub mod config;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod error;
pub mod observability;
pub mod provider;
pub mod reference;
pub mod resolver;
pub mod retry;
pub mod runtime;
pub mod secrets;

pub use config::{ClientConfig, LoggingConfig};
pub use context::Context;
pub use error::{Error, ErrorKind, Result};
pub use reference::{is_reference, Reference};
pub use retry::RetryPolicy;
pub use secrets::{
    AccessRequest, Client, CreateRequest, DeleteRequest, GrantRequest, ListRequest, ListResponse,
    MigrateBucketRequest, MigrateReport, MigrateRequest, ReadRequest, RevokeRequest, Secret,
    UpdateRequest,
};
