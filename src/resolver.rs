//! # Resolver
//!
//! Turns a reference string into plaintext, or into the path of a file
//! holding the plaintext when the reference names a destination.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::reference::Reference;
use crate::secrets::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, debug_span, Instrument};

/// Write `plaintext` to `path` with owner-only permissions and sync it
async fn materialize(path: &Path, plaintext: &[u8]) -> Result<()> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(io_err)?;

    // mode only applies on creation; tighten pre-existing files too
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_err)?;
    }

    file.write_all(plaintext).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(())
}

impl Client {
    /// Resolve a reference string
    ///
    /// Returns the plaintext, or the destination path as bytes when the
    /// reference carries one.
    ///
    /// # Errors
    /// [`Error::InvalidReference`] for bad syntax, any access error, or
    /// [`Error::Io`] if the destination cannot be written.
    pub async fn resolve(&self, ctx: &Context, s: &str) -> Result<Vec<u8>> {
        let reference = Reference::parse(s)?;
        self.resolve_reference(ctx, &reference).await
    }

    /// Resolve an already parsed reference
    ///
    /// # Errors
    /// See [`Client::resolve`].
    pub async fn resolve_reference(&self, ctx: &Context, reference: &Reference) -> Result<Vec<u8>> {
        let span = debug_span!(parent: ctx.span(), "berglas.resolve", reference = %reference);
        async {
            let plaintext = self.access(ctx, reference.into()).await?;

            match reference.destination() {
                Some(path) => {
                    debug!(path = %path.display(), "writing secret to file");
                    materialize(path, &plaintext).await?;
                    Ok(path.as_os_str().as_encoded_bytes().to_vec())
                }
                None => Ok(plaintext),
            }
        }
        .instrument(span)
        .await
    }

    /// Resolve the reference held in environment variable `key` and
    /// overwrite the variable with the result
    ///
    /// # Errors
    /// [`Error::InvalidRequest`] if the variable is unset or the result is
    /// not valid UTF-8, otherwise see [`Client::resolve`].
    pub async fn replace(&self, ctx: &Context, key: &str) -> Result<()> {
        let value = std::env::var(key)
            .map_err(|e| Error::InvalidRequest(format!("failed to read {key}: {e}")))?;
        self.replace_value(ctx, key, &value).await
    }

    /// Resolve `reference` and store the result in environment variable `key`
    ///
    /// # Errors
    /// See [`Client::replace`].
    pub async fn replace_value(&self, ctx: &Context, key: &str, reference: &str) -> Result<()> {
        debug!(key, reference, "replacing environment variable");
        let resolved = self.resolve(ctx, reference).await?;
        let resolved = String::from_utf8(resolved)
            .map_err(|e| Error::InvalidRequest(format!("secret for {key} is not UTF-8: {e}")))?;
        std::env::set_var(key, resolved);
        Ok(())
    }
}
