//! Common helpers shared by the GCP REST clients: URL construction,
//! resource name formatting and lenient JSON field decoding.

use crate::provider::ApiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use url::Url;

/// Join `path` onto `base`, keeping `path` verbatim
///
/// Used for KMS and Secret Manager resource names, whose characters never
/// need escaping.
pub(crate) fn join_url(service: &'static str, base: &str, path: &str) -> Result<Url, ApiError> {
    let joined = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| ApiError::Decode {
        service,
        message: format!("invalid URL {joined:?}: {e}"),
    })
}

/// Append percent-encoded `segments` to `base`
///
/// Each segment is encoded on its own, so object names containing `/` become
/// a single `%2F`-escaped segment as the Cloud Storage API requires.
pub(crate) fn segment_url(
    service: &'static str,
    base: &str,
    segments: &[&str],
) -> Result<Url, ApiError> {
    let mut url = Url::parse(base).map_err(|e| ApiError::Decode {
        service,
        message: format!("invalid endpoint {base:?}: {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| ApiError::Decode {
            service,
            message: format!("endpoint {base:?} cannot be a base URL"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Formats a Secret Manager secret resource path
pub(crate) fn format_secret_path(project: &str, name: &str) -> String {
    format!("projects/{project}/secrets/{name}")
}

/// Formats a Secret Manager secret version resource path
pub(crate) fn format_secret_version_path(project: &str, name: &str, version: &str) -> String {
    format!("projects/{project}/secrets/{name}/versions/{version}")
}

/// Last `/`-separated component of a resource name
pub(crate) fn basename(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

/// Decode an int64 that the JSON API may send as a string
pub(crate) fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Text(String),
        Int(i64),
    }

    match Number::deserialize(deserializer)? {
        Number::Text(text) => text.parse().map_err(serde::de::Error::custom),
        Number::Int(value) => Ok(value),
    }
}

/// Decode an optional uint64 that the JSON API may send as a string
pub(crate) fn de_opt_u64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Text(String),
        Int(u64),
    }

    match Option::<Number>::deserialize(deserializer)? {
        Some(Number::Text(text)) => text.parse().map(Some).map_err(serde::de::Error::custom),
        Some(Number::Int(value)) => Ok(Some(value)),
        None => Ok(None),
    }
}

/// RFC 3339 timestamp, tolerating absence
pub(crate) type Timestamp = Option<DateTime<Utc>>;
