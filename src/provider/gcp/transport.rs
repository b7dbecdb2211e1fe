//! Shared HTTP plumbing for the GCP REST clients: authentication, request
//! construction and error-body parsing.

use crate::provider::{canonical_status, ApiError};
use crate::config::ClientConfig;
use crate::constants::METADATA_TOKEN_URL;
use crate::observability::metrics;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

// ============================================================================
// Error Response Structures
// ============================================================================

/// GCP API error response wrapper
///
/// API Reference: https://cloud.google.com/apis/design/errors
#[derive(Debug, Deserialize)]
struct GcpErrorResponse {
    error: GcpError,
}

/// Detailed error information from a GCP API
///
/// Cloud Storage omits `status`; KMS and Secret Manager always send it.
#[derive(Debug, Deserialize)]
struct GcpError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// OAuth2 access token response from the GCP metadata server
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Turn a non-success response body into an [`ApiError`]
pub(crate) fn error_from_body(service: &'static str, status: StatusCode, body: &str) -> ApiError {
    let code = status.as_u16();
    match serde_json::from_str::<GcpErrorResponse>(body) {
        Ok(parsed) => ApiError::Status {
            service,
            code,
            status: if parsed.error.status.is_empty() {
                canonical_status(code).to_string()
            } else {
                parsed.error.status
            },
            message: parsed.error.message,
        },
        Err(_) => ApiError::Status {
            service,
            code,
            status: canonical_status(code).to_string(),
            message: if body.trim().is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                body.trim().to_string()
            },
        },
    }
}

/// Authenticated HTTP client shared by every GCP REST provider
#[derive(Clone)]
pub struct RestTransport {
    http_client: Client,
    access_token: String,
    user_agent: String,
}

impl std::fmt::Debug for RestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTransport")
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl RestTransport {
    /// Create a transport, resolving the access token
    ///
    /// Uses `config.access_token` when set, otherwise asks the GCE metadata
    /// server (Workload Identity / default service account).
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or no token is available.
    pub async fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http_client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| ApiError::Transport {
                service: "http",
                source,
            })?;

        let access_token = match &config.access_token {
            Some(token) => {
                debug!("using configured access token");
                token.clone()
            }
            None => Self::metadata_token(&http_client).await?,
        };

        Ok(Self {
            http_client,
            access_token,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Fetch an access token from the metadata server
    async fn metadata_token(http_client: &Client) -> Result<String, ApiError> {
        let response = http_client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|source| {
                warn!("Metadata server not available: {}", source);
                ApiError::Transport {
                    service: "metadata",
                    source,
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::status(
                "metadata",
                status.as_u16(),
                "UNAUTHENTICATED",
                format!(
                    "failed to get access token from metadata server; set BERGLAS_ACCESS_TOKEN when not running on GCP: {}",
                    body.trim()
                ),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| ApiError::Decode {
            service: "metadata",
            message: format!("failed to parse token response: {e}"),
        })?;
        info!("Retrieved access token from metadata server");
        Ok(token.access_token)
    }

    /// Build a request with authentication headers
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        // Add "Bearer " prefix if not already present
        let auth_header = if self.access_token.starts_with("Bearer ") {
            self.access_token.clone()
        } else {
            format!("Bearer {}", self.access_token)
        };

        self.http_client
            .request(method, url)
            .header("Authorization", auth_header)
    }

    /// Send `request`, turning transport failures and non-success statuses into [`ApiError`]
    pub(crate) async fn execute(
        &self,
        service: &'static str,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, ApiError> {
        let start = Instant::now();
        let result = request.send().await;
        let elapsed = start.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => response,
            Err(source) => {
                metrics::record_api_request(service, operation, "transport_error", elapsed);
                return Err(ApiError::Transport { service, source });
            }
        };

        let status = response.status();
        if status.is_success() {
            metrics::record_api_request(service, operation, "ok", elapsed);
            return Ok(response);
        }

        metrics::record_api_request(service, operation, status.as_str(), elapsed);
        let body = response.text().await.unwrap_or_default();
        let err = error_from_body(service, status, &body);
        debug!(service, operation, error = %err, "API request failed");
        Err(err)
    }

    /// Send and decode a JSON response
    pub(crate) async fn json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.execute(service, operation, request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|source| ApiError::Transport { service, source })?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
            service,
            message: format!("{operation}: {e}"),
        })
    }

    /// Send and return the raw response body
    pub(crate) async fn bytes(
        &self,
        service: &'static str,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Vec<u8>, ApiError> {
        let response = self.execute(service, operation, request).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|source| ApiError::Transport { service, source })
    }

    /// Send and discard the response body
    pub(crate) async fn empty(
        &self,
        service: &'static str,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<(), ApiError> {
        self.execute(service, operation, request).await.map(|_| ())
    }
}
