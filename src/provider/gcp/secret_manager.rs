//! GCP Secret Manager REST Client
//!
//! Native REST implementation for Secret Manager API v1, working directly
//! with Pact HTTP mock servers.
//!
//! References:
//! - [GCP Secret Manager REST API v1](https://cloud.google.com/secret-manager/docs/reference/rest)

use super::common::{basename, format_secret_path, format_secret_version_path, join_url, Timestamp};
use super::transport::RestTransport;
use crate::context::Context;
use crate::provider::{
    ApiError, Policy, PolicyJson, RegisterSecret, RegisterVersion, Replication, SecretRegister,
    VersionState,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, Instrument};

const SERVICE: &str = "secretmanager";

// ============================================================================
// Request/Response Structures
// ============================================================================

/// Replication configuration for a secret
///
/// Exactly one of `automatic` or `user_managed` is set.
///
/// API Reference: https://cloud.google.com/secret-manager/docs/reference/rest/v1/projects.secrets#replication
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplicationJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    automatic: Option<AutomaticJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_managed: Option<UserManagedJson>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AutomaticJson {}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserManagedJson {
    #[serde(default)]
    replicas: Vec<ReplicaJson>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReplicaJson {
    location: String,
}

impl From<&Replication> for ReplicationJson {
    fn from(replication: &Replication) -> Self {
        match replication {
            Replication::Automatic => ReplicationJson {
                automatic: Some(AutomaticJson {}),
                user_managed: None,
            },
            Replication::UserManaged(locations) => ReplicationJson {
                automatic: None,
                user_managed: Some(UserManagedJson {
                    replicas: locations
                        .iter()
                        .map(|location| ReplicaJson {
                            location: location.clone(),
                        })
                        .collect(),
                }),
            },
        }
    }
}

impl From<ReplicationJson> for Replication {
    fn from(json: ReplicationJson) -> Self {
        match json.user_managed {
            Some(user_managed) => Replication::UserManaged(
                user_managed
                    .replicas
                    .into_iter()
                    .map(|r| r.location)
                    .collect(),
            ),
            None => Replication::Automatic,
        }
    }
}

/// Secret resource
///
/// API Reference: https://cloud.google.com/secret-manager/docs/reference/rest/v1/projects.secrets#Secret
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretJson {
    name: String,
    #[serde(default)]
    replication: ReplicationJson,
    #[serde(default)]
    create_time: Timestamp,
}

/// Request body for `secrets.create`
#[derive(Debug, Serialize)]
struct CreateSecretRequest {
    replication: ReplicationJson,
}

/// Replication status of a version
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplicationStatusJson {
    #[serde(default)]
    user_managed: Option<UserManagedJson>,
}

/// Secret version resource
///
/// API Reference: https://cloud.google.com/secret-manager/docs/reference/rest/v1/projects.secrets.versions#SecretVersion
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretVersionJson {
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    create_time: Timestamp,
    #[serde(default)]
    replication_status: ReplicationStatusJson,
}

/// Secret payload; `data` is base64 on the wire
#[derive(Debug, Serialize, Deserialize)]
struct SecretPayload {
    data: String,
}

/// Request body for `secrets.addVersion`
#[derive(Debug, Serialize)]
struct AddVersionRequest {
    payload: SecretPayload,
}

/// Response body for `versions.access`
#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSecretsResponse {
    #[serde(default)]
    secrets: Vec<SecretJson>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVersionsResponse {
    #[serde(default)]
    versions: Vec<SecretVersionJson>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetIamPolicyRequest {
    policy: PolicyJson,
}

fn secret_from_json(project: &str, json: SecretJson) -> RegisterSecret {
    RegisterSecret {
        project: project.to_string(),
        name: basename(&json.name).to_string(),
        replication: json.replication.into(),
        create_time: json.create_time,
    }
}

fn version_from_json(project: &str, secret: &str, json: SecretVersionJson) -> RegisterVersion {
    let mut locations: Vec<String> = json
        .replication_status
        .user_managed
        .map(|um| um.replicas.into_iter().map(|r| r.location).collect())
        .unwrap_or_default();
    locations.sort();

    RegisterVersion {
        project: project.to_string(),
        name: secret.to_string(),
        version: basename(&json.name).to_string(),
        state: match json.state.as_str() {
            "DISABLED" => VersionState::Disabled,
            "DESTROYED" => VersionState::Destroyed,
            _ => VersionState::Enabled,
        },
        create_time: json.create_time,
        locations,
    }
}

/// GCP Secret Manager REST client
#[derive(Clone)]
pub struct SecretManagerREST {
    transport: RestTransport,
    base_url: String,
}

impl std::fmt::Debug for SecretManagerREST {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManagerREST")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SecretManagerREST {
    #[must_use]
    pub fn new(transport: RestTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> Result<url::Url, ApiError> {
        join_url(SERVICE, &self.base_url, &format!("v1/{path}"))
    }
}

#[async_trait]
impl SecretRegister for SecretManagerREST {
    async fn create_secret(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        replication: &Replication,
    ) -> Result<RegisterSecret, ApiError> {
        let span = debug_span!("gcp.secretmanager.create", project, name);
        async move {
            let request = self
                .transport
                .request(Method::POST, self.url(&format!("projects/{project}/secrets"))?)
                .query(&[("secretId", name)])
                .json(&CreateSecretRequest {
                    replication: replication.into(),
                });
            let secret: SecretJson = self
                .transport
                .json(SERVICE, "secrets.create", request)
                .await?;
            Ok(secret_from_json(project, secret))
        }
        .instrument(span)
        .await
    }

    async fn get_secret(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<RegisterSecret, ApiError> {
        let request = self
            .transport
            .request(Method::GET, self.url(&format_secret_path(project, name))?);
        let secret: SecretJson = self.transport.json(SERVICE, "secrets.get", request).await?;
        Ok(secret_from_json(project, secret))
    }

    async fn add_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<RegisterVersion, ApiError> {
        let span = debug_span!("gcp.secretmanager.add_version", project, name);
        async move {
            let path = format!("{}:addVersion", format_secret_path(project, name));
            let request = self
                .transport
                .request(Method::POST, self.url(&path)?)
                .json(&AddVersionRequest {
                    payload: SecretPayload {
                        data: general_purpose::STANDARD.encode(payload),
                    },
                });
            let version: SecretVersionJson = self
                .transport
                .json(SERVICE, "secrets.addVersion", request)
                .await?;
            debug!(version = %version.name, "added secret version");
            Ok(version_from_json(project, name, version))
        }
        .instrument(span)
        .await
    }

    async fn get_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<RegisterVersion, ApiError> {
        let request = self.transport.request(
            Method::GET,
            self.url(&format_secret_version_path(project, name, version))?,
        );
        let json: SecretVersionJson = self
            .transport
            .json(SERVICE, "versions.get", request)
            .await?;
        Ok(version_from_json(project, name, json))
    }

    async fn access_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let span = debug_span!("gcp.secretmanager.access", project, name, version);
        async move {
            let path = format!(
                "{}:access",
                format_secret_version_path(project, name, version)
            );
            let request = self.transport.request(Method::GET, self.url(&path)?);
            let response: AccessSecretVersionResponse = self
                .transport
                .json(SERVICE, "versions.access", request)
                .await?;
            general_purpose::STANDARD
                .decode(&response.payload.data)
                .map_err(|e| ApiError::Decode {
                    service: SERVICE,
                    message: format!("payload is not valid base64: {e}"),
                })
        }
        .instrument(span)
        .await
    }

    async fn list_secrets(
        &self,
        ctx: &Context,
        project: &str,
    ) -> Result<Vec<RegisterSecret>, ApiError> {
        let url = self.url(&format!("projects/{project}/secrets"))?;
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.transport.request(Method::GET, url.clone());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListSecretsResponse =
                self.transport.json(SERVICE, "secrets.list", request).await?;
            out.extend(page.secrets.into_iter().map(|s| secret_from_json(project, s)));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(_) if ctx.is_cancelled() => {
                    return Err(ApiError::Cancelled {
                        service: SERVICE,
                        operation: "secrets.list",
                    });
                }
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    async fn list_versions(
        &self,
        ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<Vec<RegisterVersion>, ApiError> {
        let url = self.url(&format!("{}/versions", format_secret_path(project, name)))?;
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.transport.request(Method::GET, url.clone());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListVersionsResponse =
                self.transport.json(SERVICE, "versions.list", request).await?;
            out.extend(
                page.versions
                    .into_iter()
                    .map(|v| version_from_json(project, name, v)),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(_) if ctx.is_cancelled() => {
                    return Err(ApiError::Cancelled {
                        service: SERVICE,
                        operation: "versions.list",
                    });
                }
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    async fn destroy_version(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        version: &str,
    ) -> Result<(), ApiError> {
        let path = format!(
            "{}:destroy",
            format_secret_version_path(project, name, version)
        );
        let request = self
            .transport
            .request(Method::POST, self.url(&path)?)
            .json(&serde_json::json!({}));
        self.transport
            .empty(SERVICE, "versions.destroy", request)
            .await
    }

    async fn delete_secret(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        let span = debug_span!("gcp.secretmanager.delete", project, name);
        async move {
            let request = self
                .transport
                .request(Method::DELETE, self.url(&format_secret_path(project, name))?);
            self.transport.empty(SERVICE, "secrets.delete", request).await
        }
        .instrument(span)
        .await
    }

    async fn get_secret_policy(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
    ) -> Result<Policy, ApiError> {
        let path = format!("{}:getIamPolicy", format_secret_path(project, name));
        let request = self.transport.request(Method::GET, self.url(&path)?);
        let policy: PolicyJson = self
            .transport
            .json(SERVICE, "secrets.getIamPolicy", request)
            .await?;
        Ok(policy.into())
    }

    async fn set_secret_policy(
        &self,
        _ctx: &Context,
        project: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<Policy, ApiError> {
        let path = format!("{}:setIamPolicy", format_secret_path(project, name));
        let request = self
            .transport
            .request(Method::POST, self.url(&path)?)
            .json(&SetIamPolicyRequest {
                policy: PolicyJson::from(policy),
            });
        let policy: PolicyJson = self
            .transport
            .json(SERVICE, "secrets.setIamPolicy", request)
            .await?;
        Ok(policy.into())
    }
}
