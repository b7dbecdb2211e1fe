//! Cloud Storage JSON API v1 client
//!
//! Objects are uploaded with a single multipart request carrying both the
//! metadata and the envelope, so preconditions apply to the whole write.
//!
//! References:
//! - [Objects](https://cloud.google.com/storage/docs/json_api/v1/objects)
//! - [Object IAM](https://cloud.google.com/storage/docs/json_api/v1/objects/getIamPolicy)

use super::common::{de_i64, de_opt_u64, segment_url, Timestamp};
use super::transport::RestTransport;
use crate::context::Context;
use crate::provider::{
    ApiError, BlobStore, ObjectAttrs, ObjectQuery, ObjectWrite, Policy, PolicyJson, Precondition,
};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, debug_span, Instrument};
use url::Url;

const SERVICE: &str = "storage";

/// Boundary of the `multipart/related` upload body
///
/// The envelope is base64 text and the metadata is JSON, neither of which
/// can contain this marker.
const MULTIPART_BOUNDARY: &str = "berglas_multipart_boundary_6b1f0c";

// ============================================================================
// Request/Response Structures
// ============================================================================

/// Object resource
///
/// API Reference: https://cloud.google.com/storage/docs/json_api/v1/objects#resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    bucket: String,
    name: String,
    #[serde(deserialize_with = "de_i64")]
    generation: i64,
    #[serde(deserialize_with = "de_i64")]
    metageneration: i64,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    updated: Timestamp,
    #[serde(default, deserialize_with = "de_opt_u64")]
    size: Option<u64>,
}

impl From<ObjectResource> for ObjectAttrs {
    fn from(resource: ObjectResource) -> Self {
        ObjectAttrs {
            bucket: resource.bucket,
            name: resource.name,
            generation: resource.generation,
            metageneration: resource.metageneration,
            metadata: resource.metadata.unwrap_or_default(),
            updated: resource.updated,
            size: resource.size.unwrap_or(0),
        }
    }
}

/// Metadata part of a multipart upload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadMetadata<'a> {
    name: &'a str,
    cache_control: &'a str,
    content_type: &'a str,
    metadata: &'a BTreeMap<String, String>,
}

/// Response from `objects.list`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Cloud Storage REST client
#[derive(Clone)]
pub struct StorageREST {
    transport: RestTransport,
    base_url: String,
}

impl std::fmt::Debug for StorageREST {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageREST")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StorageREST {
    /// Create a client for the JSON API at `base_url`
    #[must_use]
    pub fn new(transport: RestTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    fn object_url(&self, bucket: &str, name: &str, suffix: &[&str]) -> Result<Url, ApiError> {
        let mut segments = vec!["storage", "v1", "b", bucket, "o", name];
        segments.extend_from_slice(suffix);
        segment_url(SERVICE, &self.base_url, &segments)
    }

    fn upload_body(write: &ObjectWrite) -> Result<Vec<u8>, ApiError> {
        let metadata = serde_json::to_string(&UploadMetadata {
            name: &write.name,
            cache_control: &write.cache_control,
            content_type: &write.content_type,
            metadata: &write.metadata,
        })
        .map_err(|e| ApiError::Decode {
            service: SERVICE,
            message: format!("failed to encode object metadata: {e}"),
        })?;

        let mut body = Vec::with_capacity(metadata.len() + write.data.len() + 256);
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: {}\r\n\r\n",
                write.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&write.data);
        body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
        Ok(body)
    }
}

#[async_trait]
impl BlobStore for StorageREST {
    async fn object_attrs(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        generation: Option<i64>,
    ) -> Result<ObjectAttrs, ApiError> {
        let span = debug_span!("gcp.storage.attrs", bucket, name, generation);
        async move {
            let mut request = self
                .transport
                .request(Method::GET, self.object_url(bucket, name, &[])?);
            if let Some(generation) = generation {
                request = request.query(&[("generation", generation.to_string())]);
            }
            let resource: ObjectResource =
                self.transport.json(SERVICE, "objects.get", request).await?;
            Ok(resource.into())
        }
        .instrument(span)
        .await
    }

    async fn read_object(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<Vec<u8>, ApiError> {
        let span = debug_span!("gcp.storage.read", bucket, name, generation);
        async move {
            let request = self
                .transport
                .request(Method::GET, self.object_url(bucket, name, &[])?)
                .query(&[("alt", "media".to_string()), ("generation", generation.to_string())]);
            self.transport.bytes(SERVICE, "objects.media", request).await
        }
        .instrument(span)
        .await
    }

    async fn write_object(
        &self,
        _ctx: &Context,
        write: &ObjectWrite,
    ) -> Result<ObjectAttrs, ApiError> {
        let span = debug_span!(
            "gcp.storage.write",
            bucket = %write.bucket,
            name = %write.name,
            precondition = ?write.precondition
        );
        async move {
            let url = segment_url(
                SERVICE,
                &self.base_url,
                &["upload", "storage", "v1", "b", &write.bucket, "o"],
            )?;

            let mut query = vec![("uploadType", "multipart".to_string())];
            match write.precondition {
                Precondition::DoesNotExist => {
                    query.push(("ifGenerationMatch", "0".to_string()));
                }
                Precondition::Match {
                    generation,
                    metageneration,
                } => {
                    query.push(("ifGenerationMatch", generation.to_string()));
                    query.push(("ifMetagenerationMatch", metageneration.to_string()));
                }
            }

            let request = self
                .transport
                .request(Method::POST, url)
                .query(&query)
                .header(
                    "Content-Type",
                    format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
                )
                .body(Self::upload_body(write)?);

            let resource: ObjectResource =
                self.transport.json(SERVICE, "objects.insert", request).await?;
            debug!(generation = resource.generation, "uploaded object");
            Ok(resource.into())
        }
        .instrument(span)
        .await
    }

    async fn delete_object(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<(), ApiError> {
        let span = debug_span!("gcp.storage.delete", bucket, name, generation);
        async move {
            let request = self
                .transport
                .request(Method::DELETE, self.object_url(bucket, name, &[])?)
                .query(&[("generation", generation.to_string())]);
            self.transport.empty(SERVICE, "objects.delete", request).await
        }
        .instrument(span)
        .await
    }

    async fn list_objects(
        &self,
        ctx: &Context,
        query: &ObjectQuery,
    ) -> Result<Vec<ObjectAttrs>, ApiError> {
        let span = debug_span!(
            "gcp.storage.list",
            bucket = %query.bucket,
            prefix = ?query.prefix,
            versions = query.versions
        );
        async move {
            let url = segment_url(
                SERVICE,
                &self.base_url,
                &["storage", "v1", "b", &query.bucket, "o"],
            )?;

            let mut out = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let mut params: Vec<(&str, String)> = Vec::new();
                if let Some(prefix) = &query.prefix {
                    params.push(("prefix", prefix.clone()));
                }
                if query.versions {
                    params.push(("versions", "true".to_string()));
                }
                if let Some(token) = &page_token {
                    params.push(("pageToken", token.clone()));
                }

                let request = self
                    .transport
                    .request(Method::GET, url.clone())
                    .query(&params);
                let page: ListObjectsResponse =
                    self.transport.json(SERVICE, "objects.list", request).await?;
                out.extend(page.items.into_iter().map(ObjectAttrs::from));

                match page.next_page_token.filter(|t| !t.is_empty()) {
                    Some(_) if ctx.is_cancelled() => {
                        return Err(ApiError::Cancelled {
                            service: SERVICE,
                            operation: "objects.list",
                        });
                    }
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
            debug!(count = out.len(), "listed objects");
            Ok(out)
        }
        .instrument(span)
        .await
    }

    async fn get_object_policy(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
    ) -> Result<Policy, ApiError> {
        let request = self
            .transport
            .request(Method::GET, self.object_url(bucket, name, &["iam"])?);
        let policy: PolicyJson = self
            .transport
            .json(SERVICE, "objects.getIamPolicy", request)
            .await?;
        Ok(policy.into())
    }

    async fn set_object_policy(
        &self,
        _ctx: &Context,
        bucket: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        let request = self
            .transport
            .request(Method::PUT, self.object_url(bucket, name, &["iam"])?)
            .json(&PolicyJson::from(policy));
        let policy: PolicyJson = self
            .transport
            .json(SERVICE, "objects.setIamPolicy", request)
            .await?;
        Ok(policy.into())
    }
}
