//! Minimal client for a paginated speech-database REST API.
//!
//! This crate provides a focused client for list endpoints that return
//! results in pages of the shape `{ count, next, results }`:
//! - One GET per page, following the server-provided `next` cursor
//! - Untyped pass-through of query-string filter parameters
//! - A pluggable transport for deterministic tests

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when fetching from the API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// One raw record from a list endpoint, keys left untyped.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// One page of a paged list response.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    /// Total number of records the server reports for the query.
    pub count: u64,
    /// Absolute URL of the next page, or `None` on the last page.
    pub next: Option<String>,
    /// Records carried by this page, in server order.
    pub results: Vec<RawRecord>,
}

/// A single-page GET against the API.
///
/// The first request of a fetch carries the caller's query parameters;
/// follow-up requests go to the server-provided `next` URL verbatim.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, Error>;
}

/// HTTP transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with default timeouts.
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a transport with explicit request and connect timeouts.
    pub fn with_timeouts(timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(connect_timeout)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, Error> {
        let mut request = self.client.get(url);
        if !params.is_empty() {
            request = request.query(params);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        response.json().await.map_err(|e| Error::Parse(e.to_string()))
    }
}

/// Speech-database API client.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    base: String,
}

impl Client {
    /// Create a client for the given API base URL, using HTTP transport
    /// with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_transport(base_url, Arc::new(HttpTransport::new()))
    }

    /// Create a client with a custom transport.
    pub fn with_transport(base_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base: base_url.into(),
        }
    }

    /// The configured API base URL.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Collect every record of a paged list endpoint, in server order.
    ///
    /// Issues the first request against `{base}/{endpoint}` with the given
    /// query parameters, then follows the `next` cursor until it is null.
    /// If the accumulated record count disagrees with the server-reported
    /// total, a warning is logged and the accumulated records are returned
    /// anyway. Any non-success status aborts the whole fetch.
    pub async fn get_paged(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<RawRecord>, Error> {
        let base = self.base.trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        let url = format!("{base}/{endpoint}");

        let mut page = self.transport.get(&url, params).await?;
        let expected = page.count;
        let mut results = std::mem::take(&mut page.results);

        while let Some(next) = page.next.take() {
            page = self.transport.get(&next, &[]).await?;
            results.append(&mut page.results);
        }

        if results.len() as u64 != expected {
            tracing::warn!(
                endpoint,
                expected,
                got = results.len(),
                "paged fetch returned fewer records than the server reported"
            );
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        pages: Mutex<VecDeque<Result<Page, Error>>>,
        requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl ScriptedTransport {
        fn new(pages: Vec<Result<Page, Error>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(String, Vec<(String, String)>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, Error> {
            self.requests.lock().unwrap().push((
                url.to_string(),
                params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
            self.pages.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(Error::Api {
                    status: 500,
                    message: "no scripted page left".to_string(),
                })
            })
        }
    }

    fn record(id: u64) -> RawRecord {
        match json!({ "id": id }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn page(count: u64, next: Option<&str>, ids: &[u64]) -> Page {
        Page {
            count,
            next: next.map(str::to_string),
            results: ids.iter().copied().map(record).collect(),
        }
    }

    #[tokio::test]
    async fn test_single_page() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(page(2, None, &[1, 2]))]));
        let client = Client::with_transport("http://api.test/api", transport.clone());

        let records = client.get_paged("authors", &[]).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], json!(1));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.requests()[0].0, "http://api.test/api/authors");
    }

    #[tokio::test]
    async fn test_follows_next_cursor_in_order() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(page(5, Some("http://api.test/api/speeches?page=2"), &[1, 2])),
            Ok(page(5, Some("http://api.test/api/speeches?page=3"), &[3, 4])),
            Ok(page(5, None, &[5])),
        ]));
        let client = Client::with_transport("http://api.test/api", transport.clone());

        let records = client.get_paged("speeches", &[]).await.unwrap();

        let ids: Vec<u64> = records.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].0, "http://api.test/api/speeches?page=2");
        assert_eq!(requests[2].0, "http://api.test/api/speeches?page=3");
    }

    #[tokio::test]
    async fn test_params_only_on_first_request() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(page(3, Some("http://api.test/api/speeches?page=2"), &[1, 2])),
            Ok(page(3, None, &[3])),
        ]));
        let client = Client::with_transport("http://api.test/api", transport.clone());

        client
            .get_paged("speeches", &[("spkr_gender", "female")])
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests[0].1,
            vec![("spkr_gender".to_string(), "female".to_string())]
        );
        assert!(requests[1].1.is_empty());
    }

    #[tokio::test]
    async fn test_count_mismatch_returns_accumulated_records() {
        // Server promises 3 but delivers 2: warn, don't fail.
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(page(3, None, &[1, 2]))]));
        let client = Client::with_transport("http://api.test/api", transport);

        let records = client.get_paged("works", &[]).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_error_status_aborts_fetch() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(page(3, Some("http://api.test/api/works?page=2"), &[1, 2])),
            Err(Error::Api {
                status: 502,
                message: "bad gateway".to_string(),
            }),
        ]));
        let client = Client::with_transport("http://api.test/api", transport);

        let err = client.get_paged("works", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_slashes_are_tidied() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(page(0, None, &[]))]));
        let client = Client::with_transport("http://api.test/api/", transport.clone());

        client.get_paged("/authors", &[]).await.unwrap();

        assert_eq!(transport.requests()[0].0, "http://api.test/api/authors");
    }
}
