//! Testing utilities for the entity graph.
//!
//! This module provides tools for deterministic tests without a network:
//! - `MockTransport`, a scripted page source that records every request
//! - Record builders producing realistic raw JSON records
//! - `mock_session` wiring both into a ready `Session`

use crate::entities::EntityId;
use crate::session::{Session, SessionConfig};
use async_trait::async_trait;
use serde_json::{json, Value};
use speechdb::{Error, Page, RawRecord, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A transport that serves scripted pages in order.
///
/// Pages are consumed one per request, regardless of URL; an exhausted
/// script answers with an API error so a test that fetches too much
/// fails loudly.
pub struct MockTransport {
    pages: Mutex<VecDeque<Result<Page, Error>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// One request the mock transport has served.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a page to serve for the next request.
    pub fn queue_page(&self, page: Page) {
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    /// Queue an error to serve for the next request.
    pub fn queue_error(&self, error: Error) {
        self.pages.lock().unwrap().push_back(Err(error));
    }

    /// Every request served so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, Error> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self.pages.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(Error::Api {
                status: 500,
                message: "mock transport has no scripted page left".to_string(),
            })
        })
    }
}

/// A session backed by a fresh `MockTransport`.
pub fn mock_session() -> (Session, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let session = Session::with_transport(
        SessionConfig::new("http://mock.test/api"),
        transport.clone(),
    );
    (session, transport)
}

/// Build a page from record values (each must be a JSON object).
pub fn page(count: u64, next: Option<&str>, results: Vec<Value>) -> Page {
    Page {
        count,
        next: next.map(str::to_string),
        results: results.into_iter().map(into_record).collect(),
    }
}

fn into_record(value: Value) -> RawRecord {
    match value {
        Value::Object(map) => map,
        other => panic!("test record must be a JSON object, got {other}"),
    }
}

// ============================================================================
// Record builders
// ============================================================================

pub fn author_record(id: EntityId, name: &str) -> Value {
    json!({ "id": id, "name": name })
}

pub fn work_record(id: EntityId, title: &str, author: Value) -> Value {
    json!({ "id": id, "title": title, "author": author })
}

pub fn character_record(id: EntityId, name: &str, gender: &str) -> Value {
    json!({ "id": id, "name": name, "gender": gender, "being": "mortal", "number": "individual" })
}

pub fn instance_record(id: EntityId, context: &str, character: Value) -> Value {
    json!({ "id": id, "context": context, "char": character })
}

pub fn anonymous_instance_record(id: EntityId, context: &str) -> Value {
    json!({ "id": id, "context": context, "anon": true, "char": null })
}

pub fn cluster_record(id: EntityId, work: Value) -> Value {
    json!({ "id": id, "type": "D", "work": work })
}

pub fn speech_record(
    id: EntityId,
    seq: u64,
    cluster: Value,
    spkr: Vec<Value>,
    addr: Vec<Value>,
) -> Value {
    json!({
        "id": id,
        "seq": seq,
        "l_fi": format!("{seq}.1"),
        "l_la": format!("{seq}.10"),
        "cluster": cluster,
        "spkr": spkr,
        "addr": addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_serves_pages_in_order() {
        let transport = MockTransport::new();
        transport.queue_page(page(1, None, vec![author_record(1, "Homer")]));
        transport.queue_page(page(1, None, vec![author_record(2, "Vergil")]));

        let first = transport.get("http://mock.test/api/authors", &[]).await.unwrap();
        let second = transport.get("http://mock.test/api/authors", &[]).await.unwrap();

        assert_eq!(first.results[0]["id"], json!(1));
        assert_eq!(second.results[0]["id"], json!(2));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_script_fails_loudly() {
        let transport = MockTransport::new();
        let err = transport.get("http://mock.test/api/authors", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
    }

    #[test]
    fn test_record_builders_produce_objects() {
        let rec = speech_record(
            1,
            2,
            cluster_record(5, work_record(10, "Iliad", author_record(20, "Homer"))),
            vec![instance_record(30, "Il. 1", character_record(40, "Achilles", "male"))],
            vec![anonymous_instance_record(31, "Il. 1")],
        );
        assert_eq!(rec["id"], json!(1));
        assert_eq!(rec["cluster"]["work"]["author"]["name"], json!("Homer"));
        assert_eq!(rec["spkr"][0]["char"]["gender"], json!("male"));
        assert_eq!(rec["addr"][0]["anon"], json!(true));
    }
}
