//! Session - the primary public API for the speech database.
//!
//! A session owns the HTTP configuration and the per-type identity
//! caches, so everything fetched through one session shares one entity
//! graph. Sessions are cheap to clone (the handle is shared) and
//! independent of each other; discarding the last handle releases the
//! whole graph. There is no explicit close.

use crate::builder::{self, BuildError};
use crate::cache::Caches;
use crate::collection::Collection;
use crate::entities::{
    Author, Character, CharacterInstance, Entity, Speech, SpeechCluster, Work,
};
use speechdb::{HttpTransport, RawRecord, Transport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] speechdb::Error),

    #[error("Invalid record: {0}")]
    Build(#[from] BuildError),
}

/// Configuration for creating a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the API, e.g. `https://example.org/api`.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Connect timeout.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Create a config for the given API base URL with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

struct SessionInner {
    client: speechdb::Client,
    caches: Caches,
}

/// A connection to the speech database.
///
/// All resource methods take untyped query parameters that are passed
/// through to the endpoint unchanged, fetch every page, and materialize
/// the records into the session's entity graph in server order.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over HTTP with the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        let transport = HttpTransport::with_timeouts(config.timeout, config.connect_timeout);
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a session with a custom transport (used by tests).
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client: speechdb::Client::with_transport(config.base_url, transport),
                caches: Caches::new(),
            }),
        }
    }

    /// The configured API base URL.
    pub fn base_url(&self) -> &str {
        self.inner.client.base_url()
    }

    async fn list<T: Entity>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        build: fn(&Caches, &RawRecord) -> Result<Arc<T>, BuildError>,
    ) -> Result<Collection<T>, SessionError> {
        let records = self.inner.client.get_paged(endpoint, params).await?;
        let mut items = Vec::with_capacity(records.len());
        for rec in &records {
            items.push(build(&self.inner.caches, rec)?);
        }
        tracing::debug!(endpoint, count = items.len(), "materialized records");
        Ok(Collection::new(self.clone(), items))
    }

    /// Retrieve authors.
    pub async fn authors(&self, params: &[(&str, &str)]) -> Result<Collection<Author>, SessionError> {
        self.list("authors", params, builder::author).await
    }

    /// Retrieve works.
    pub async fn works(&self, params: &[(&str, &str)]) -> Result<Collection<Work>, SessionError> {
        self.list("works", params, builder::work).await
    }

    /// Retrieve characters.
    pub async fn characters(
        &self,
        params: &[(&str, &str)],
    ) -> Result<Collection<Character>, SessionError> {
        self.list("characters", params, builder::character).await
    }

    /// Retrieve character instances.
    pub async fn instances(
        &self,
        params: &[(&str, &str)],
    ) -> Result<Collection<CharacterInstance>, SessionError> {
        self.list("instances", params, builder::instance).await
    }

    /// Retrieve speech clusters.
    pub async fn clusters(
        &self,
        params: &[(&str, &str)],
    ) -> Result<Collection<SpeechCluster>, SessionError> {
        self.list("clusters", params, builder::cluster).await
    }

    /// Retrieve speeches.
    pub async fn speeches(&self, params: &[(&str, &str)]) -> Result<Collection<Speech>, SessionError> {
        self.list("speeches", params, builder::speech).await
    }

    /// Every author materialized so far, in cache-insertion order.
    /// No network round trip.
    pub fn cached_authors(&self) -> Collection<Author> {
        Collection::new(self.clone(), self.inner.caches.authors.snapshot())
    }

    /// Every work materialized so far, in cache-insertion order.
    pub fn cached_works(&self) -> Collection<Work> {
        Collection::new(self.clone(), self.inner.caches.works.snapshot())
    }

    /// Every character materialized so far, in cache-insertion order.
    pub fn cached_characters(&self) -> Collection<Character> {
        Collection::new(self.clone(), self.inner.caches.characters.snapshot())
    }

    /// Every character instance materialized so far, in cache-insertion order.
    pub fn cached_instances(&self) -> Collection<CharacterInstance> {
        Collection::new(self.clone(), self.inner.caches.instances.snapshot())
    }

    /// Every speech cluster materialized so far, in cache-insertion order.
    pub fn cached_clusters(&self) -> Collection<SpeechCluster> {
        Collection::new(self.clone(), self.inner.caches.clusters.snapshot())
    }

    /// Every speech materialized so far, in cache-insertion order.
    pub fn cached_speeches(&self) -> Collection<Speech> {
        Collection::new(self.clone(), self.inner.caches.speeches.snapshot())
    }

    /// The first speech of a cluster (lowest sequence number), fetched on
    /// first use and memoized on the cluster afterwards.
    pub async fn first_speech(
        &self,
        cluster: &Arc<SpeechCluster>,
    ) -> Result<Option<Arc<Speech>>, SessionError> {
        if let Some(memo) = cluster.first_speech.get() {
            return Ok(memo.upgrade());
        }

        let cluster_id = cluster.id.to_string();
        let speeches = self
            .speeches(&[("cluster_id", cluster_id.as_str())])
            .await?;
        let first = speeches
            .iter()
            .min_by_key(|s| s.seq.unwrap_or(u64::MAX))
            .cloned();

        if let Some(speech) = &first {
            // Another task may have memoized meanwhile; the cached value
            // is the same instance either way.
            let _ = cluster.first_speech.set(Arc::downgrade(speech));
        }

        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        author_record, cluster_record, mock_session, page, speech_record, work_record,
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_list_builds_collection_in_server_order() {
        let (session, transport) = mock_session();
        transport.queue_page(page(
            2,
            None,
            vec![author_record(2, "Vergil"), author_record(1, "Homer")],
        ));

        let authors = session.authors(&[]).await.unwrap();

        assert_eq!(authors.ids(), vec![2, 1]);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_query_params_pass_through() {
        let (session, transport) = mock_session();
        transport.queue_page(page(0, None, vec![]));

        session.works(&[("lang", "greek")]).await.unwrap();

        let requests = transport.requests();
        assert!(requests[0].url.ends_with("/works"));
        assert_eq!(
            requests[0].params,
            vec![("lang".to_string(), "greek".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cached_views_need_no_network() {
        let (session, transport) = mock_session();
        let work = work_record(10, "Iliad", author_record(20, "Homer"));
        transport.queue_page(page(1, None, vec![work]));

        session.works(&[]).await.unwrap();
        assert_eq!(transport.request_count(), 1);

        let works = session.cached_works();
        let authors = session.cached_authors();
        assert_eq!(works.ids(), vec![10]);
        assert_eq!(authors.ids(), vec![20]);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_view_is_insertion_ordered_across_fetches() {
        let (session, transport) = mock_session();
        transport.queue_page(page(1, None, vec![author_record(5, "Vergil")]));
        transport.queue_page(page(1, None, vec![author_record(3, "Homer")]));

        session.authors(&[]).await.unwrap();
        session.authors(&[]).await.unwrap();

        assert_eq!(session.cached_authors().ids(), vec![5, 3]);
    }

    #[tokio::test]
    async fn test_transport_error_yields_no_collection() {
        let (session, transport) = mock_session();
        transport.queue_error(speechdb::Error::Api {
            status: 503,
            message: "unavailable".to_string(),
        });

        let err = session.speeches(&[]).await.unwrap_err();
        assert!(matches!(err, SessionError::Fetch(_)));
        assert!(session.cached_speeches().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_yields_build_error() {
        let (session, transport) = mock_session();
        transport.queue_page(page(1, None, vec![json!({ "name": "no id here" })]));

        let err = session.authors(&[]).await.unwrap_err();
        assert!(matches!(err, SessionError::Build(_)));
    }

    #[tokio::test]
    async fn test_first_speech_is_fetched_once_then_memoized() {
        let (session, transport) = mock_session();
        let cluster_rec = cluster_record(5, work_record(10, "Iliad", author_record(20, "Homer")));
        transport.queue_page(page(1, None, vec![cluster_rec.clone()]));

        let clusters = session.clusters(&[]).await.unwrap();
        let cluster = clusters.first().unwrap().clone();
        assert!(cluster.first_speech().is_none());

        transport.queue_page(page(
            2,
            None,
            vec![
                speech_record(2, 7, cluster_rec.clone(), vec![], vec![]),
                speech_record(1, 3, cluster_rec, vec![], vec![]),
            ],
        ));

        let first = session.first_speech(&cluster).await.unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(transport.request_count(), 2);

        // Memoized: no further request, same instance.
        let again = session.first_speech(&cluster).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(transport.request_count(), 2);
        assert!(Arc::ptr_eq(&cluster.first_speech().unwrap(), &first));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (s1, t1) = mock_session();
        let (s2, t2) = mock_session();
        t1.queue_page(page(1, None, vec![author_record(1, "Homer")]));
        t2.queue_page(page(1, None, vec![author_record(1, "Homerus")]));

        let a1 = s1.authors(&[]).await.unwrap();
        let a2 = s2.authors(&[]).await.unwrap();

        assert!(!Arc::ptr_eq(&a1[0], &a2[0]));
        assert_eq!(a1[0].name.as_deref(), Some("Homer"));
        assert_eq!(a2[0].name.as_deref(), Some("Homerus"));
    }
}
