//! # Berglas CLI
//!
//! Command-line front end for the [`berglas`] library. Every secret is named
//! by a reference:
//!
//! ```bash
//! # Create a secret in Cloud Storage, encrypted with a KMS key
//! berglas create berglas://my-bucket/api-key s3cr3t \
//!     --key projects/p/locations/global/keyRings/r/cryptoKeys/k
//!
//! # Create a secret in Secret Manager from a file
//! berglas create sm://my-project/api-key @api-key.txt
//!
//! # Print the plaintext
//! berglas access sm://my-project/api-key#3
//!
//! # Allow a service account to read it
//! berglas grant berglas://my-bucket/api-key --member serviceAccount:app@p.iam.gserviceaccount.com
//! ```
//!
//! Failures exit with 61 for bad input and 60 for everything else.

use berglas::config::{LogFormat, LogLevel};
use berglas::constants::{API_EXIT_CODE, MISUSE_EXIT_CODE, VERSION};
use berglas::observability::gather_metrics;
use berglas::secrets::ListRequest;
use berglas::{
    AccessRequest, Client, ClientConfig, Context, CreateRequest, DeleteRequest, Error,
    GrantRequest, MigrateBucketRequest, MigrateRequest, ReadRequest, Reference, Result,
    RevokeRequest, Secret, UpdateRequest,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info_span;

/// Store and retrieve secrets on Google Cloud
#[derive(Debug, Parser)]
#[command(name = "berglas")]
#[command(
    about = "Store and retrieve secrets on Google Cloud",
    long_about = None,
    after_help = "\
References:
  berglas://<bucket>/<object>[#<generation>]  - Cloud Storage + KMS
  sm://<project>/<name>[#<version>]           - Secret Manager

Data arguments:
  -         read from stdin
  @<path>   read from a file
  <text>    use the argument itself
"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (overrides BERGLAS_LOG_LEVEL)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Log format, text or json (overrides BERGLAS_LOG_FORMAT)
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true)]
    pub print_metrics: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new secret
    Create {
        /// Reference of the secret to create
        #[arg(value_name = "REFERENCE")]
        reference: String,

        /// Secret payload
        #[arg(value_name = "DATA")]
        data: String,

        /// KMS crypto key (Cloud Storage only)
        #[arg(long)]
        key: Option<String>,

        /// Replica locations (Secret Manager only; automatic when empty)
        #[arg(long, value_delimiter = ',')]
        locations: Vec<String>,
    },
    /// Print the plaintext of a secret
    Access {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },
    /// Print a secret's metadata as JSON
    Read {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },
    /// Write a new version of a secret
    Update {
        #[arg(value_name = "REFERENCE")]
        reference: String,

        /// New payload; re-encrypts the current one when omitted
        #[arg(value_name = "DATA")]
        data: Option<String>,

        /// New KMS crypto key (Cloud Storage only)
        #[arg(long)]
        key: Option<String>,

        /// Create the secret if it does not exist
        #[arg(long)]
        create_if_missing: bool,

        /// Replica locations used when creating (Secret Manager only)
        #[arg(long, value_delimiter = ',')]
        locations: Vec<String>,
    },
    /// Delete a secret, or one Secret Manager version with `#<version>`
    Delete {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },
    /// List secrets in a bucket or `sm://<project>`
    List {
        #[arg(value_name = "BUCKET_OR_PROJECT")]
        target: String,

        /// Only secrets whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Include every generation or version
        #[arg(long, short = 'a')]
        all_generations: bool,
    },
    /// Grant IAM members read access to a secret
    Grant {
        #[arg(value_name = "REFERENCE")]
        reference: String,

        /// Member to grant (repeatable), e.g. `user:me@example.com`
        #[arg(long = "member", short = 'm', required = true)]
        members: Vec<String>,
    },
    /// Revoke IAM members' read access to a secret
    Revoke {
        #[arg(value_name = "REFERENCE")]
        reference: String,

        /// Member to revoke (repeatable)
        #[arg(long = "member", short = 'm', required = true)]
        members: Vec<String>,
    },
    /// Resolve a reference, writing to its destination if it has one
    Resolve {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },
    /// Copy Cloud Storage secrets into Secret Manager
    Migrate {
        /// Source `berglas://bucket/object`, or a bucket to migrate every secret in it
        #[arg(value_name = "REFERENCE")]
        reference: String,

        /// Target project
        #[arg(long)]
        project: String,

        /// Target secret name for a single object; defaults to the object
        /// name with '/' replaced by '_'
        #[arg(long)]
        name: Option<String>,

        /// Replica locations if the target is created
        #[arg(long, value_delimiter = ',')]
        locations: Vec<String>,
    },
    /// Print version information
    Version,
}

/// Process exit code for a failed command
#[must_use]
pub fn exit_code(err: &Error) -> i32 {
    if err.is_misuse() {
        MISUSE_EXIT_CODE
    } else {
        API_EXIT_CODE
    }
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Create { .. } => "create",
            Commands::Access { .. } => "access",
            Commands::Read { .. } => "read",
            Commands::Update { .. } => "update",
            Commands::Delete { .. } => "delete",
            Commands::List { .. } => "list",
            Commands::Grant { .. } => "grant",
            Commands::Revoke { .. } => "revoke",
            Commands::Resolve { .. } => "resolve",
            Commands::Migrate { .. } => "migrate",
            Commands::Version => "version",
        }
    }
}

/// Run the parsed command
///
/// # Errors
/// Whatever the underlying operation returns.
pub async fn run(cli: Cli) -> Result<()> {
    let result = dispatch(cli.command).await;
    if cli.print_metrics {
        eprint!("{}", gather_metrics());
    }
    result
}

async fn dispatch(command: Commands) -> Result<()> {
    if let Commands::Version = command {
        println!(
            "berglas {VERSION} (built {}, commit {})",
            env!("BUILD_DATETIME"),
            env!("BUILD_GIT_HASH")
        );
        return Ok(());
    }

    let client = Client::new(&ClientConfig::from_env()).await?;
    let ctx = Context::new().with_span(info_span!("berglas.cli", command = command.name()));

    match command {
        Commands::Create {
            reference,
            data,
            key,
            locations,
        } => {
            let plaintext = read_data(&data).await?;
            let request = match Reference::parse(&reference)? {
                Reference::Storage { bucket, object, .. } => CreateRequest::Storage {
                    bucket,
                    object,
                    key: key.ok_or(Error::MissingField("key"))?,
                    plaintext,
                },
                Reference::SecretManager { project, name, .. } => CreateRequest::SecretManager {
                    project,
                    name,
                    plaintext,
                    locations,
                },
            };
            let secret = client.create(&ctx, request).await?;
            println!("Successfully created secret {}", describe(&secret));
        }
        Commands::Access { reference } => {
            let reference = Reference::parse(&reference)?;
            let plaintext = client.access(&ctx, AccessRequest::from(&reference)).await?;
            write_stdout(&plaintext).await?;
        }
        Commands::Read { reference } => {
            let reference = Reference::parse(&reference)?;
            let request = ReadRequest::from(AccessRequest::from(&reference));
            let secret = client.read(&ctx, request).await?;
            let metadata = json!({
                "parent": secret.parent,
                "name": secret.name,
                "generation": secret.generation,
                "metageneration": secret.metageneration,
                "version": secret.version,
                "kmsKey": secret.kms_key,
                "updatedAt": secret.updated_at,
                "locations": secret.locations,
            });
            println!("{metadata:#}");
        }
        Commands::Update {
            reference,
            data,
            key,
            create_if_missing,
            locations,
        } => {
            let plaintext = match data {
                Some(data) => Some(read_data(&data).await?),
                None => None,
            };
            let request = match Reference::parse(&reference)? {
                Reference::Storage {
                    bucket,
                    object,
                    generation,
                    ..
                } => UpdateRequest::Storage {
                    bucket,
                    object,
                    generation,
                    metageneration: 0,
                    key,
                    plaintext,
                    create_if_missing,
                },
                Reference::SecretManager { project, name, .. } => UpdateRequest::SecretManager {
                    project,
                    name,
                    plaintext,
                    locations,
                    create_if_missing,
                },
            };
            let secret = client.update(&ctx, request).await?;
            println!("Successfully updated secret {}", describe(&secret));
        }
        Commands::Delete { reference } => {
            let request = match Reference::parse(&reference)? {
                Reference::Storage { bucket, object, .. } => {
                    DeleteRequest::Storage { bucket, object }
                }
                Reference::SecretManager {
                    project,
                    name,
                    version,
                    ..
                } => DeleteRequest::SecretManager {
                    project,
                    name,
                    version: Some(version).filter(|v| !v.is_empty()),
                },
            };
            client.delete(&ctx, request).await?;
            println!("Successfully deleted secret {reference}");
        }
        Commands::List {
            target,
            prefix,
            all_generations,
        } => {
            let request = list_request(&target, prefix, all_generations)?;
            let response = client.list(&ctx, request).await?;
            for secret in &response.secrets {
                println!("{}", list_line(secret, all_generations));
            }
        }
        Commands::Grant { reference, members } => {
            let request = match Reference::parse(&reference)? {
                Reference::Storage { bucket, object, .. } => GrantRequest::Storage {
                    bucket,
                    object,
                    members,
                },
                Reference::SecretManager { project, name, .. } => GrantRequest::SecretManager {
                    project,
                    name,
                    members,
                },
            };
            client.grant(&ctx, request).await?;
            println!("Successfully granted access to {reference}");
        }
        Commands::Revoke { reference, members } => {
            let request = match Reference::parse(&reference)? {
                Reference::Storage { bucket, object, .. } => RevokeRequest::Storage {
                    bucket,
                    object,
                    members,
                },
                Reference::SecretManager { project, name, .. } => RevokeRequest::SecretManager {
                    project,
                    name,
                    members,
                },
            };
            client.revoke(&ctx, request).await?;
            println!("Successfully revoked access to {reference}");
        }
        Commands::Resolve { reference } => {
            let resolved = client.resolve(&ctx, &reference).await?;
            write_stdout(&resolved).await?;
        }
        Commands::Migrate {
            reference,
            project,
            name,
            locations,
        } => {
            if let Some(bucket) = bucket_target(&reference) {
                if name.is_some() {
                    return Err(Error::InvalidRequest(
                        "--name only applies when migrating a single object".to_string(),
                    ));
                }
                let report = client
                    .migrate_bucket(
                        &ctx,
                        MigrateBucketRequest {
                            bucket,
                            project,
                            locations,
                        },
                    )
                    .await?;
                for (source, secret) in &report.migrated {
                    println!("Migrated {source} to {}", describe(secret));
                }
                for source in &report.skipped {
                    println!("Skipped {source} (empty plaintext)");
                }
                return Ok(());
            }

            let Reference::Storage { bucket, object, .. } = Reference::parse(&reference)? else {
                return Err(Error::InvalidRequest(format!(
                    "{reference} is not a berglas:// reference"
                )));
            };
            let migrated = client
                .migrate(
                    &ctx,
                    MigrateRequest {
                        bucket,
                        object,
                        project,
                        name,
                        locations,
                    },
                )
                .await?;
            match migrated {
                Some(secret) => {
                    println!("Successfully migrated {reference} to {}", describe(&secret));
                }
                None => println!("Skipped {reference} (empty plaintext)"),
            }
        }
        Commands::Version => {}
    }

    Ok(())
}

/// Build a list request from `bucket`, `berglas://bucket` or `sm://project`
fn list_request(target: &str, prefix: Option<String>, all: bool) -> Result<ListRequest> {
    let trimmed = |s: &str| s.trim_matches('/').to_string();
    let request = if let Some(project) = target.strip_prefix(berglas::constants::SECRET_MANAGER_SCHEME) {
        ListRequest::SecretManager {
            project: trimmed(project),
            prefix,
            versions: all,
        }
    } else {
        let bucket = target
            .strip_prefix(berglas::constants::STORAGE_SCHEME)
            .unwrap_or(target);
        ListRequest::Storage {
            bucket: trimmed(bucket),
            prefix,
            generations: all,
        }
    };

    match &request {
        ListRequest::Storage { bucket: parent, .. }
        | ListRequest::SecretManager {
            project: parent, ..
        } if parent.contains('/') => Err(Error::InvalidRequest(format!(
            "{target} names a secret, expected a bucket or project"
        ))),
        _ => Ok(request),
    }
}

/// Bucket named by `bucket`, `gs://bucket` or `berglas://bucket`, if the
/// target names no object
fn bucket_target(target: &str) -> Option<String> {
    if target.starts_with(berglas::constants::SECRET_MANAGER_SCHEME) {
        return None;
    }
    let bucket = target
        .strip_prefix(berglas::constants::STORAGE_SCHEME)
        .or_else(|| target.strip_prefix("gs://"))
        .unwrap_or(target)
        .trim_matches('/');
    (!bucket.is_empty() && !bucket.contains('/')).then(|| bucket.to_string())
}

fn list_line(secret: &Secret, all: bool) -> String {
    let updated = secret
        .updated_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    match (all, secret.version.is_empty()) {
        (false, _) => secret.name.clone(),
        (true, true) => format!("{}#{}\t{updated}", secret.name, secret.generation),
        (true, false) => format!("{}#{}\t{updated}", secret.name, secret.version),
    }
}

fn describe(secret: &Secret) -> String {
    if secret.version.is_empty() {
        format!("{}/{}#{}", secret.parent, secret.name, secret.generation)
    } else {
        format!("{}/{}#{}", secret.parent, secret.name, secret.version)
    }
}

/// Interpret a data argument: `-` is stdin, `@path` a file, anything else literal
async fn read_data(data: &str) -> Result<Vec<u8>> {
    if data == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .map_err(|source| Error::Io {
                path: PathBuf::from("<stdin>"),
                source,
            })?;
        return Ok(buf);
    }
    if let Some(path) = data.strip_prefix('@') {
        return tokio::fs::read(path).await.map_err(|source| Error::Io {
            path: PathBuf::from(path),
            source,
        });
    }
    Ok(data.as_bytes().to_vec())
}

async fn write_stdout(bytes: &[u8]) -> Result<()> {
    let io_err = |source| Error::Io {
        path: PathBuf::from("<stdout>"),
        source,
    };
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await.map_err(io_err)?;
    stdout.flush().await.map_err(io_err)
}
