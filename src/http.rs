//! Thin HTTP transport used by discovery, OAuth, and the server API
//!
//! This module wraps a shared [`reqwest::Client`] behind the small
//! surface the rest of the core needs: GET and form-encoded POST with
//! optional headers and query parameters, returning status + headers +
//! body. It is stateless per call; retry policy lives with the callers.
//!
//! Non-2xx responses are not an error at this layer. Callers that only
//! care about success use [`HttpResponse::into_success`]; callers that
//! branch on status codes (the 401 refresh path) inspect
//! [`HttpResponse::status`] directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{PeregrineError, Result};

/// Default per-request timeout applied to the shared client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// RequestOptions
// ---------------------------------------------------------------------------

/// Optional per-request parameters: extra headers and query pairs.
///
/// # Examples
///
/// ```
/// use peregrine::http::RequestOptions;
///
/// let opts = RequestOptions::new()
///     .header("Authorization", "Bearer token123")
///     .query("profile_id", "internet");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl RequestOptions {
    /// Creates an empty options set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a URL query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// HttpResponse
// ---------------------------------------------------------------------------

/// Status, headers, and body of a completed HTTP exchange.
#[derive(Debug)]
pub struct HttpResponse {
    /// Numeric HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: reqwest::header::HeaderMap,
    /// Raw response body bytes.
    pub body: Vec<u8>,
    /// The URL that was requested, kept for error context.
    pub url: String,
}

impl HttpResponse {
    /// Returns `true` when the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts the response into its body, or a typed status error.
    ///
    /// # Errors
    ///
    /// Returns [`PeregrineError::Status`] carrying the URL and status
    /// code when the response is not 2xx.
    pub fn into_success(self) -> Result<Vec<u8>> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(PeregrineError::Status {
                url: self.url,
                status: self.status,
            }
            .into())
        }
    }

    /// Interprets the body as UTF-8, replacing invalid sequences.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// Shared HTTP client for all network traffic in the core.
///
/// Cloning is cheap; all clones share one connection pool.
///
/// # Examples
///
/// ```no_run
/// use peregrine::http::HttpClient;
///
/// # async fn example() -> peregrine::error::Result<()> {
/// let http = HttpClient::new();
/// let resp = http.get("https://disco.eduvpn.org/v2/server_list.json").await?;
/// println!("{} bytes", resp.body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Arc<reqwest::Client>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the default request timeout.
    pub fn new() -> Self {
        let inner = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(client: Arc<reqwest::Client>) -> Self {
        Self { inner: client }
    }

    /// Issues a GET request with no options.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.get_with_opts(url, &RequestOptions::new()).await
    }

    /// Issues a GET request with headers and query parameters applied.
    pub async fn get_with_opts(&self, url: &str, opts: &RequestOptions) -> Result<HttpResponse> {
        let full_url = construct_url(url, &opts.query)?;
        let mut req = self.inner.get(&full_url);
        for (name, value) in &opts.headers {
            req = req.header(name, value);
        }
        Self::complete(full_url, req).await
    }

    /// Issues a form-encoded POST request.
    pub async fn post_form(
        &self,
        url: &str,
        form: &HashMap<&str, &str>,
        opts: &RequestOptions,
    ) -> Result<HttpResponse> {
        let full_url = construct_url(url, &opts.query)?;
        let mut req = self.inner.post(&full_url).form(form);
        for (name, value) in &opts.headers {
            req = req.header(name, value);
        }
        Self::complete(full_url, req).await
    }

    /// Sends the prepared request and collects the response.
    async fn complete(url: String, req: reqwest::RequestBuilder) -> Result<HttpResponse> {
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Joins a path segment onto a base URL.
///
/// # Errors
///
/// Returns a URL parse error when the base is not a valid absolute URL.
///
/// # Examples
///
/// ```
/// use peregrine::http::join_url;
///
/// let url = join_url("https://disco.eduvpn.org/v2/", "server_list.json").unwrap();
/// assert_eq!(url, "https://disco.eduvpn.org/v2/server_list.json");
/// ```
pub fn join_url(base: &str, file: &str) -> Result<String> {
    let base_url = Url::parse(base)?;
    let joined = base_url.join(file)?;
    Ok(joined.to_string())
}

/// Builds a URL with the given query parameters appended.
///
/// Existing query parameters on `base` are preserved; new ones are
/// appended in sorted key order so constructed URLs are deterministic.
pub fn construct_url(base: &str, parameters: &HashMap<String, String>) -> Result<String> {
    if parameters.is_empty() {
        return Ok(base.to_string());
    }
    let mut url = Url::parse(base)?;
    {
        let mut sorted: Vec<_> = parameters.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let mut query = url.query_pairs_mut();
        for (name, value) in sorted {
            query.append_pair(name, value);
        }
    }
    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
