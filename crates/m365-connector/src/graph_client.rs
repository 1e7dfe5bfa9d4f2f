//! Microsoft Graph API HTTP client with retry, pagination and JSON batching.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::classify_response;
use crate::{M365Config, ProvisionError, ProvisionResult, RetryPolicy, TokenProvider};

/// Maximum number of sub-requests Graph accepts in one `$batch` call.
pub const MAX_BATCH_SIZE: usize = 20;

/// Response wrapper for paginated Graph API responses.
#[derive(Debug, Deserialize)]
pub struct ODataResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// One sub-request of a `$batch` call. `url` is relative to the API version root.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub id: String,
    pub method: String,
    pub url: String,
}

impl BatchRequest {
    #[must_use]
    pub fn get(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: "GET".to_string(),
            url: url.into(),
        }
    }
}

/// One sub-response of a `$batch` call.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct BatchEnvelope<'a> {
    requests: &'a [BatchRequest],
}

#[derive(Deserialize)]
struct BatchResult {
    #[serde(default)]
    responses: Vec<BatchResponse>,
}

/// Microsoft Graph API client.
///
/// Paths starting with `/` are resolved against the versioned Graph root;
/// absolute URLs (such as `@odata.nextLink` values) are used as given.
pub struct GraphClient {
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
    scope: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("scope", &self.scope)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    /// Creates a new Graph client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &M365Config, tokens: Arc<dyn TokenProvider>) -> ProvisionResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProvisionError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            tokens,
            base_url: config.graph_url(),
            scope: config.graph_scope(),
            retry: config.retry.clone(),
        })
    }

    /// Returns the versioned base URL for Graph API requests.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of a directory object, for `@odata.id` and `@odata.bind` references.
    #[must_use]
    pub fn directory_object_url(&self, object_id: &str) -> String {
        format!("{}/directoryObjects/{}", self.base_url, object_id)
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Performs a GET request.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ProvisionResult<T> {
        let body = self.request_with_retry(reqwest::Method::GET, path, None).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Performs a POST request and parses the response body.
    #[instrument(skip(self, body))]
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ProvisionResult<T> {
        let payload = serde_json::to_value(body)?;
        let body = self
            .request_with_retry(reqwest::Method::POST, path, Some(&payload))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Performs a POST request whose response carries no body (e.g. `$ref` writes).
    #[instrument(skip(self, body))]
    pub async fn post_no_content<B: Serialize>(&self, path: &str, body: &B) -> ProvisionResult<()> {
        let payload = serde_json::to_value(body)?;
        self.request_with_retry(reqwest::Method::POST, path, Some(&payload))
            .await?;
        Ok(())
    }

    /// Performs a PATCH request. Graph answers 204 for updates.
    #[instrument(skip(self, body))]
    pub async fn patch<B: Serialize>(&self, path: &str, body: &B) -> ProvisionResult<()> {
        let payload = serde_json::to_value(body)?;
        self.request_with_retry(reqwest::Method::PATCH, path, Some(&payload))
            .await?;
        Ok(())
    }

    /// Performs a DELETE request.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> ProvisionResult<()> {
        self.request_with_retry(reqwest::Method::DELETE, path, None)
            .await?;
        Ok(())
    }

    /// Fetches every page of a collection, following `@odata.nextLink`.
    #[instrument(skip(self))]
    pub async fn get_all<T: DeserializeOwned>(&self, path: &str) -> ProvisionResult<Vec<T>> {
        let mut url = path.to_string();
        let mut items = Vec::new();

        loop {
            debug!("Fetching page: {}", url);
            let page: ODataResponse<T> = self.get(&url).await?;
            items.extend(page.value);

            match page.next_link {
                Some(next) => url = next,
                None => return Ok(items),
            }
        }
    }

    /// Sends up to [`MAX_BATCH_SIZE`] sub-requests in a single `$batch` call.
    ///
    /// Sub-responses are returned as-is; callers inspect each status.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn batch(&self, requests: &[BatchRequest]) -> ProvisionResult<Vec<BatchResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(ProvisionError::Validation {
                message: format!(
                    "A batch holds at most {MAX_BATCH_SIZE} requests, got {}",
                    requests.len()
                ),
                not_found: Vec::new(),
            });
        }

        let result: BatchResult = self.post("/$batch", &BatchEnvelope { requests }).await?;
        Ok(result.responses)
    }

    /// Performs the request under the retry policy and returns the raw body.
    async fn request_with_retry(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ProvisionResult<String> {
        let url = self.url_for(path);
        let url = url.as_str();
        let operation = format!("graph {method} {path}");

        self.retry
            .execute(&operation, move || self.send_once(method.clone(), url, body))
            .await
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> ProvisionResult<String> {
        let token = self.tokens.get_token(&self.scope).await?;

        let mut request = self.http_client.request(method, url).bearer_auth(&token);
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(text);
        }

        Err(classify_response(status, &text))
    }
}
