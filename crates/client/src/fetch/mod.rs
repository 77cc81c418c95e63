//! HTTP fetcher backing the permanent cache.
//!
//! ### Request handling
//! - Request headers are forwarded except the internal item-type tag
//! - Redirects are followed up to a limit (default: 5)
//! - Bodies above `max_bytes` are rejected (default: 20MB)
//!
//! ### Status mapping
//! - `304` → [`Error::NotModified`]
//! - `404` → [`Error::DoesNotExist`]
//! - Anything else is returned as a response; callers judge success

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};

use permacache_core::config::AppConfig;
use permacache_core::fetch::Headers;
use permacache_core::keys::PERSIST_ITEM_TYPE_HEADER;
use permacache_core::{Error, FetchRequest, FetchResponse, Fetcher};

pub use self::url::{UrlError, canonicalize, resolve_resource};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "permacache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 20MB)
    pub max_bytes: usize,

    /// Request timeout (default: 30s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "permacache/0.1".to_string(),
            max_bytes: 20 * 1024 * 1024,
            timeout: Duration::from_millis(30_000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: config.max_redirects,
        }
    }
}

/// Flatten a header map, joining repeated values with `, `.
fn flatten_headers(headers: &header::HeaderMap) -> Headers {
    let mut flat = Headers::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

/// reqwest-backed [`Fetcher`].
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Fetch(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn build(&self, request: &FetchRequest) -> reqwest::RequestBuilder {
        let mut builder = self.http.get(request.url.as_str());
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case(PERSIST_ITEM_TYPE_HEADER) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }
}

#[async_trait]
impl Fetcher for FetchClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let start = Instant::now();

        let response = self
            .build(request)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("network error: {}", e)))?;

        let status = response.status();
        match status {
            StatusCode::NOT_MODIFIED => return Err(Error::NotModified),
            StatusCode::NOT_FOUND => return Err(Error::DoesNotExist(request.url.to_string())),
            _ => {}
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::Fetch(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let headers = flatten_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Fetch(format!("failed to read response: {}", e)))?;

        if body.len() > self.config.max_bytes {
            return Err(Error::Fetch(format!("{} bytes exceeds {}", body.len(), self.config.max_bytes)));
        }

        tracing::debug!(
            "fetched {} ({}) in {}ms ({} bytes)",
            request.url,
            status.as_u16(),
            start.elapsed().as_millis(),
            body.len()
        );

        Ok(FetchResponse { url: request.url.clone(), status: status.as_u16(), headers, body })
    }
}
