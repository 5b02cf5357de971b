//! # HTTP Retrieval Utilities
//!
//! Asynchronous API client wrapper around `reqwest`, with exponential backoff
//! retries for transient failures and a uniform response envelope. Used for
//! the Tempest REST metadata lookup that precedes the live session.

use anyhow::Context;
use reqwest::{header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE}, Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::{de::DeserializeOwned, Serialize};

/// Public Tempest REST endpoint. The trailing slash matters for `Url::join`.
pub const DEFAULT_API_URL: &str = "https://swd.weatherflow.com/swd/rest/";

/// Transient failures retried before the request is reported as failed.
const MAX_RETRIES: u32 = 3;

/// A standardized container for API responses.
/// 
/// This struct wraps the deserialized data along with metadata about the 
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// The body of a successful response, or an error carrying status and body.
    pub fn into_data(self) -> anyhow::Result<T> {
        match self.data {
            Some(data) if self.success => Ok(data),
            _ => anyhow::bail!(
                "HTTP {}: {}",
                self.status,
                self.error_body.as_deref().unwrap_or("<empty body>")
            ),
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs,
/// authentication tokens, and automatic retries.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient` instance with a retry policy.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.example.com/v1/").
    /// * `auth_token` - An optional string for the Authorization header.
    ///
    /// # Errors
    /// Fails if the `base_url` is not a valid absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)
            .with_context(|| format!("Invalid base URL '{}' (must be absolute)", base_url))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        // Construct the client with the retry middleware
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// The base URL requests are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Shorthand for a body-less `GET`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<ApiResponse<T>> {
        self.request::<T, ()>(Method::GET, path, None, None).await
    }

    /// Performs a generic HTTP request and handles the response.
    ///
    /// This method manages URL joining, header injection, authentication, 
    /// and JSON serialization/deserialization.
    ///
    /// # Arguments
    /// * `method` - The HTTP verb (GET, POST, etc.).
    /// * `path` - The relative path to append to the base URL.
    /// * `headers` - Optional additional headers for this specific request.
    /// * `body` - Optional serializable object to send as the JSON body.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining or network execution fails.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let full_url = self.base_url.join(path)?;
        let method_name = method.to_string();
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        log::debug!("{} {}", method_name, path);
        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let success = status.is_success();

        if success {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_relative_base_url() {
        assert!(ApiClient::new("swd/rest/", None).is_err());
    }

    #[test]
    fn test_joins_paths_under_base() {
        let client = ApiClient::new(DEFAULT_API_URL, Some("t".to_string())).unwrap();
        let joined = client.base_url().join("stations/1234").unwrap();
        assert_eq!(
            joined.as_str(),
            "https://swd.weatherflow.com/swd/rest/stations/1234"
        );
    }

    #[test]
    fn test_into_data_reports_status() {
        let failed: ApiResponse<u32> = ApiResponse {
            data: None,
            error_body: Some("unauthorized".to_string()),
            status: 401,
            success: false,
            headers: HeaderMap::new(),
        };
        assert_eq!(failed.into_data().unwrap_err().to_string(), "HTTP 401: unauthorized");

        let ok = ApiResponse {
            data: Some(7u32),
            error_body: None,
            status: 200,
            success: true,
            headers: HeaderMap::new(),
        };
        assert_eq!(ok.into_data().unwrap(), 7);
    }
}
