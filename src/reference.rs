//! # References
//!
//! Secrets are addressed by URI-like references:
//!
//! ```text
//! berglas://<bucket>/<object>[?destination=<dest>][#<generation>]
//! sm://<project>/<name>[?destination=<dest>][#<version>]
//! ```
//!
//! The object part of a storage reference may contain `/`; Secret Manager
//! names may not. `destination` is either `tempfile` / `tmpfile`, which
//! allocates a fresh file under the system temp dir at parse time, or a
//! literal file path.

use crate::constants::{SECRET_MANAGER_SCHEME, STORAGE_SCHEME};
use crate::error::{Error, Result};
use crate::secrets::AccessRequest;
use std::fmt;
use std::path::{Path, PathBuf};

/// True if `s` looks like a reference for either backend
#[must_use]
pub fn is_reference(s: &str) -> bool {
    is_storage_reference(s) || is_secret_manager_reference(s)
}

/// True if `s` starts with the storage scheme
#[must_use]
pub fn is_storage_reference(s: &str) -> bool {
    s.starts_with(STORAGE_SCHEME)
}

/// True if `s` starts with the Secret Manager scheme
#[must_use]
pub fn is_secret_manager_reference(s: &str) -> bool {
    s.starts_with(SECRET_MANAGER_SCHEME)
}

/// A parsed secret reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Storage {
        bucket: String,
        object: String,
        /// Pinned generation; 0 for the live one
        generation: i64,
        destination: Option<PathBuf>,
    },
    SecretManager {
        project: String,
        name: String,
        /// Pinned version; empty for `latest`
        version: String,
        destination: Option<PathBuf>,
    },
}

impl Reference {
    /// Parse `s`
    ///
    /// # Errors
    /// [`Error::InvalidReference`] on any grammar violation, [`Error::Io`]
    /// if a temporary destination cannot be allocated.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix(SECRET_MANAGER_SCHEME) {
            let parts = split(s, rest)?;
            if parts.name.contains('/') {
                return Err(Error::invalid_reference(
                    s,
                    format!("secret manager name {:?} cannot contain '/'", parts.name),
                ));
            }
            let destination = destination(parts.name, parts.destination.as_deref())?;
            Ok(Reference::SecretManager {
                project: parts.parent.to_string(),
                name: parts.name.to_string(),
                version: parts.fragment.unwrap_or_default().to_string(),
                destination,
            })
        } else if let Some(rest) = s.strip_prefix(STORAGE_SCHEME) {
            let parts = split(s, rest.strip_prefix('/').unwrap_or(rest))?;
            let generation = match parts.fragment.filter(|f| !f.is_empty()) {
                Some(fragment) => fragment.parse::<i64>().map_err(|e| {
                    Error::invalid_reference(s, format!("generation {fragment:?}: {e}"))
                })?,
                None => 0,
            };
            let destination = destination(parts.name, parts.destination.as_deref())?;
            Ok(Reference::Storage {
                bucket: parts.parent.to_string(),
                object: parts.name.to_string(),
                generation,
                destination,
            })
        } else {
            Err(Error::invalid_reference(
                s,
                "not a storage or secret manager reference",
            ))
        }
    }

    /// Bucket or project
    #[must_use]
    pub fn parent(&self) -> &str {
        match self {
            Reference::Storage { bucket, .. } => bucket,
            Reference::SecretManager { project, .. } => project,
        }
    }

    /// Object or secret name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Reference::Storage { object, .. } => object,
            Reference::SecretManager { name, .. } => name,
        }
    }

    /// File the resolved secret should be written to, if any
    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Reference::Storage { destination, .. } | Reference::SecretManager { destination, .. } => {
                destination.as_deref()
            }
        }
    }
}

impl std::str::FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Storage {
                bucket,
                object,
                generation,
                ..
            } => {
                write!(f, "{STORAGE_SCHEME}{bucket}/{object}")?;
                if *generation != 0 {
                    write!(f, "#{generation}")?;
                }
                Ok(())
            }
            Reference::SecretManager {
                project,
                name,
                version,
                ..
            } => {
                write!(f, "{SECRET_MANAGER_SCHEME}{project}/{name}")?;
                if !version.is_empty() {
                    write!(f, "#{version}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&Reference> for AccessRequest {
    fn from(reference: &Reference) -> Self {
        match reference {
            Reference::Storage {
                bucket,
                object,
                generation,
                ..
            } => AccessRequest::Storage {
                bucket: bucket.clone(),
                object: object.clone(),
                generation: *generation,
            },
            Reference::SecretManager {
                project,
                name,
                version,
                ..
            } => AccessRequest::SecretManager {
                project: project.clone(),
                name: name.clone(),
                version: version.clone(),
            },
        }
    }
}

/// Pieces of a reference body after the scheme
struct Parts<'a> {
    parent: &'a str,
    name: &'a str,
    fragment: Option<&'a str>,
    destination: Option<String>,
}

fn split<'a>(reference: &str, body: &'a str) -> Result<Parts<'a>> {
    let (body, fragment) = match body.split_once('#') {
        Some((body, fragment)) => (body, Some(fragment)),
        None => (body, None),
    };
    let (path, query) = match body.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (body, None),
    };

    let Some((parent, name)) = path.split_once('/') else {
        return Err(Error::invalid_reference(
            reference,
            "expected <parent>/<name>",
        ));
    };
    if parent.trim().is_empty() {
        return Err(Error::invalid_reference(reference, "missing bucket or project"));
    }
    if name.trim().is_empty() {
        return Err(Error::invalid_reference(reference, "missing secret name"));
    }

    let destination = query.and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "destination")
            .map(|(_, value)| value.into_owned())
    });

    Ok(Parts {
        parent,
        name,
        fragment,
        destination,
    })
}

/// Resolve the `destination` query value into a path
///
/// `tempfile` and `tmpfile` create an empty file named `berglas-*` that
/// keeps the secret name's extension.
fn destination(name: &str, value: Option<&str>) -> Result<Option<PathBuf>> {
    match value {
        None | Some("") => Ok(None),
        Some("tempfile" | "tmpfile") => {
            let suffix = Path::new(name)
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            let file = tempfile::Builder::new()
                .prefix("berglas-")
                .suffix(&suffix)
                .tempfile()
                .map_err(|source| Error::Io {
                    path: std::env::temp_dir(),
                    source,
                })?;
            let (_, path) = file.keep().map_err(|e| Error::Io {
                path: e.file.path().to_path_buf(),
                source: e.error,
            })?;
            Ok(Some(path))
        }
        Some(path) => Ok(Some(PathBuf::from(path))),
    }
}
