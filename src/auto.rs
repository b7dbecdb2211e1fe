//! # Auto Import
//!
//! Scans the runtime environment for variables holding secret references
//! and replaces each with its resolved value in the current process.
//!
//! Fetching the variables is retried with the client's retry policy, but a
//! 4xx from the environment source is never retried.

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::provider::ApiError;
use crate::reference::is_reference;
use crate::retry::{retry, RetryError};
use crate::runtime::RuntimeEnvironment;
use crate::secrets::Client;
use tracing::{debug, info, info_span, warn, Instrument};

/// Settings for [`import`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Log failures and keep going instead of stopping at the first one
    pub continue_on_error: bool,
}

impl From<&ClientConfig> for ImportOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            continue_on_error: config.continue_on_error,
        }
    }
}

/// What [`import`] did
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Variables replaced with their resolved value
    pub replaced: Vec<String>,
    /// Variables left untouched, with the reason (only with `continue_on_error`)
    pub failed: Vec<(String, Error)>,
}

fn is_transient(err: &ApiError) -> bool {
    match err.code() {
        Some(code) => code >= 500,
        None => matches!(err, ApiError::Transport { .. }),
    }
}

/// Resolve every reference found in `runtime`'s variables into the process environment
///
/// # Errors
/// The first failure, unless `options.continue_on_error` is set.
pub async fn import(
    client: &Client,
    ctx: &Context,
    runtime: &dyn RuntimeEnvironment,
    options: ImportOptions,
) -> Result<ImportReport> {
    let span = info_span!(parent: ctx.span(), "berglas.auto_import");
    async {
        let mut report = ImportReport::default();

        let vars = match retry(ctx, client.retry_policy(), "env_vars", is_transient, |_| {
            runtime.env_vars(ctx)
        })
        .await
        {
            Ok(vars) => vars,
            Err(RetryError::Cancelled) => return Err(Error::Cancelled),
            Err(RetryError::Fatal(e) | RetryError::Exhausted { last: e, .. }) => {
                let err = Error::api("list environment variables from", "runtime", e);
                if !options.continue_on_error {
                    return Err(err);
                }
                warn!(error = %err, "skipping environment import");
                return Ok(report);
            }
        };

        for (key, value) in vars.iter().filter(|(_, v)| is_reference(v)) {
            debug!(key, "resolving reference");
            match client.replace_value(ctx, key, value).await {
                Ok(()) => report.replaced.push(key.clone()),
                Err(err) if options.continue_on_error => {
                    warn!(key, error = %err, "failed to resolve reference, continuing");
                    report.failed.push((key.clone(), err));
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            replaced = report.replaced.len(),
            failed = report.failed.len(),
            "imported secrets into environment"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}
