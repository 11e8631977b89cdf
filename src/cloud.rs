//! ==============================================================================
//! cloud.rs - Cloud Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the two cloud stores the device talks to:
//!     - firestore (document store): list every document in a collection
//!     - realtime database (key-value store): set or merge json at a path
//!     abstracts away the difference between the real REST endpoints
//!     (using `reqwest`) and an in-memory stand-in for benches and tests.
//!
//! relationships:
//!     - used by: sync.rs (every guarded operation goes through CloudProvider)
//!     - uses: reqwest blocking client (FirestoreRtdb)
//!     - uses: config.rs (FirebaseConfig for urls, token, timeout)
//!
//! ==============================================================================

use crate::config::FirebaseConfig;
use crate::domain::Document;
use crate::error::SdkError;

use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

pub trait CloudProvider {
    /// live readiness check (credentials present, client usable)
    fn is_ready(&self) -> bool;
    /// raw payload of "list all documents in `collection`"
    fn get_documents(&mut self, project_id: &str, collection: &str) -> Result<String, SdkError>;
    /// replace the node at `path`
    fn set_json(&mut self, path: &str, value: &Document) -> Result<(), SdkError>;
    /// merge `value` into the node at `path`
    fn update_node(&mut self, path: &str, value: &Document) -> Result<(), SdkError>;
}

// ==============================================================================================
// MEMORY IMPLEMENTATION (For benches / tests without network)
// ==============================================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct FailureFlags {
    pub fetch: bool,
    pub set: bool,
    pub update: bool,
}

/// how many times each sdk call actually ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch: usize,
    pub set: usize,
    pub update: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.fetch + self.set + self.update
    }
}

pub struct MemoryCloud {
    ready: bool,
    collections: BTreeMap<String, Vec<Value>>,
    raw_payloads: BTreeMap<String, String>,
    tree: Value,
    failures: FailureFlags,
    calls: CallCounts,
}

impl MemoryCloud {
    pub fn new() -> Self {
        tracing::info!("Using MEMORY cloud (no network access)");
        Self {
            ready: true,
            collections: BTreeMap::new(),
            raw_payloads: BTreeMap::new(),
            tree: Value::Null,
            failures: FailureFlags::default(),
            calls: CallCounts::default(),
        }
    }

    pub fn with_failures(mut self, failures: FailureFlags) -> Self {
        self.failures = failures;
        self
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// add a firestore-shaped document (`{"name": .., "fields": {..}}`)
    pub fn insert_document(&mut self, collection: &str, document: Value) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// answer fetches of `collection` with `payload` verbatim, valid json or not
    pub fn with_raw_payload(mut self, collection: &str, payload: &str) -> Self {
        self.raw_payloads
            .insert(collection.to_string(), payload.to_string());
        self
    }

    /// seed the key-value tree directly, bypassing call counters
    pub fn seed_node(&mut self, path: &str, value: Value) {
        *node_mut(&mut self.tree, path) = value;
    }

    pub fn node(&self, path: &str) -> Option<&Value> {
        segments(path).try_fold(&self.tree, |node, segment| node.as_object()?.get(segment))
    }

    pub fn calls(&self) -> CallCounts {
        self.calls
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudProvider for MemoryCloud {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn get_documents(&mut self, project_id: &str, collection: &str) -> Result<String, SdkError> {
        self.calls.fetch += 1;
        tracing::debug!("[MEMORY FIRESTORE] {}/{}", project_id, collection);
        if self.failures.fetch {
            return Err(SdkError::new("memory fetch failure"));
        }
        if let Some(raw) = self.raw_payloads.get(collection) {
            return Ok(raw.clone());
        }
        // firestore omits `documents` entirely for an empty collection
        let payload = match self.collections.get(collection) {
            Some(docs) if !docs.is_empty() => serde_json::json!({ "documents": docs }),
            _ => Value::Object(Map::new()),
        };
        Ok(payload.to_string())
    }

    fn set_json(&mut self, path: &str, value: &Document) -> Result<(), SdkError> {
        self.calls.set += 1;
        tracing::debug!("[MEMORY RTDB] set {}", path);
        if self.failures.set {
            return Err(SdkError::new("memory set failure"));
        }
        *node_mut(&mut self.tree, path) = without_nulls(value.as_value());
        Ok(())
    }

    fn update_node(&mut self, path: &str, value: &Document) -> Result<(), SdkError> {
        self.calls.update += 1;
        tracing::debug!("[MEMORY RTDB] update {}", path);
        if self.failures.update {
            return Err(SdkError::new("memory update failure"));
        }
        match (node_mut(&mut self.tree, path), value.as_value()) {
            (Value::Object(existing), Value::Object(patch)) => {
                for (key, child) in patch {
                    // rtdb deletes a child when it is patched with null
                    if child.is_null() {
                        existing.remove(key);
                    } else {
                        existing.insert(key.clone(), without_nulls(child));
                    }
                }
            }
            (node, patch) => *node = without_nulls(patch),
        }
        Ok(())
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// rtdb never stores null children
fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, child)| !child.is_null())
                .map(|(key, child)| (key.clone(), without_nulls(child)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// walk to `path`, turning anything in the way into an object
fn node_mut<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
    segments(path).fold(root, |node, segment| {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        &mut node[segment]
    })
}

// ==============================================================================================
// REST IMPLEMENTATION (Firestore v1 + Realtime Database)
// ==============================================================================================

pub struct FirestoreRtdb {
    http: reqwest::blocking::Client,
    firestore_url: Url,
    database_url: Url,
    auth_token: Option<String>,
    require_auth: bool,
    page_size: u32,
}

impl FirestoreRtdb {
    pub fn new(config: &FirebaseConfig) -> anyhow::Result<Self> {
        tracing::info!("Using REST cloud ({})", config.database_url);
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            firestore_url: base_url(&config.firestore_url)?,
            database_url: base_url(&config.database_url)?,
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
            require_auth: config.require_auth,
            page_size: config.page_size,
        })
    }

    /// `{firestore}/projects/{project}/databases/(default)/documents/{collection}`
    fn documents_url(&self, project_id: &str, collection: &str) -> Url {
        with_segments(
            &self.firestore_url,
            ["projects", project_id, "databases", "(default)", "documents", collection]
                .into_iter()
                .map(str::to_string),
        )
    }

    /// `{database}/{path}.json`, each path segment percent-encoded
    fn rtdb_url(&self, path: &str) -> Url {
        let mut parts: Vec<String> = segments(path).map(str::to_string).collect();
        match parts.last_mut() {
            Some(last) => last.push_str(".json"),
            None => parts.push(".json".to_string()),
        }
        with_segments(&self.database_url, parts.into_iter())
    }

    fn with_rtdb_auth(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<String, SdkError> {
        let response = request.send().map_err(|e| SdkError::new(e.to_string()))?;
        let status = response.status();
        let body = response.text().map_err(|e| SdkError::new(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(SdkError::new(error_reason(status.as_u16(), &body)))
        }
    }
}

impl CloudProvider for FirestoreRtdb {
    fn is_ready(&self) -> bool {
        !self.require_auth || self.auth_token.is_some()
    }

    /// follows `nextPageToken` until the collection is exhausted and hands
    /// back every page's documents as one list response
    fn get_documents(&mut self, project_id: &str, collection: &str) -> Result<String, SdkError> {
        let url = self.documents_url(project_id, collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(url.clone())
                .query(&[("pageSize", self.page_size)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            if let Some(token) = &self.auth_token {
                request = request.bearer_auth(token);
            }

            let body = self.send(request)?;
            let mut page: Value = serde_json::from_str(&body)
                .map_err(|e| SdkError::new(format!("invalid firestore page: {}", e)))?;

            if let Some(Value::Array(docs)) = page.get_mut("documents").map(Value::take) {
                documents.extend(docs);
            }
            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);

            match &page_token {
                Some(token) => tracing::debug!(%collection, %token, "fetching next page"),
                None => break,
            }
        }

        let payload = if documents.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::json!({ "documents": documents })
        };
        Ok(payload.to_string())
    }

    fn set_json(&mut self, path: &str, value: &Document) -> Result<(), SdkError> {
        let request = self.with_rtdb_auth(self.http.put(self.rtdb_url(path)).json(value));
        self.send(request).map(|_| ())
    }

    fn update_node(&mut self, path: &str, value: &Document) -> Result<(), SdkError> {
        let request = self.with_rtdb_auth(self.http.patch(self.rtdb_url(path)).json(value));
        self.send(request).map(|_| ())
    }
}

fn base_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw)?;
    if url.cannot_be_a_base() {
        anyhow::bail!("not a base url: {}", raw);
    }
    Ok(url)
}

/// append already-split segments to `base`, letting `Url` do the escaping
fn with_segments(base: &Url, parts: impl Iterator<Item = String>) -> Url {
    let mut url = base.clone();
    // base_url() rejected cannot-be-a-base urls, so this always succeeds
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(parts);
    }
    url
}

/// pull a readable reason out of an error response
///
/// firestore answers `{"error": {"message": ..}}`, the realtime database
/// answers `{"error": ".."}`.
fn error_reason(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| match v.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("message")?.as_str().map(str::to_string),
        _ => None,
    });

    match message {
        Some(message) => format!("{} (http {})", message, status),
        None => format!("http status {}", status),
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// answer one request per body on a local port; yields the request lines
    fn serve_pages(bodies: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let mut request_lines = Vec::new();
            for body in bodies {
                let (mut stream, _) = listener.accept().unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let head = String::from_utf8_lossy(&head);
                request_lines.push(head.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
            request_lines
        });

        (base, handle)
    }

    #[test]
    fn test_set_replaces_node() {
        let mut cloud = MemoryCloud::new();
        cloud.seed_node("attendance/2024-01-01", json!({"y": 2}));

        cloud
            .set_json("attendance/2024-01-01", &Document::from(json!({"x": 1})))
            .unwrap();

        assert_eq!(cloud.node("attendance/2024-01-01"), Some(&json!({"x": 1})));
        assert_eq!(cloud.calls().set, 1);
    }

    #[test]
    fn test_update_merges_and_null_deletes() {
        let mut cloud = MemoryCloud::new();
        cloud.seed_node("devices/gate-01", json!({"a": 1, "b": 2}));

        cloud
            .update_node("devices/gate-01", &Document::from(json!({"b": null, "c": 3})))
            .unwrap();

        assert_eq!(cloud.node("devices/gate-01"), Some(&json!({"a": 1, "c": 3})));
    }

    #[test]
    fn test_update_on_missing_node_drops_nulls() {
        let mut cloud = MemoryCloud::new();

        cloud
            .update_node("devices/new", &Document::from(json!({"a": 1, "b": null, "c": {"d": null}})))
            .unwrap();

        assert_eq!(cloud.node("devices/new"), Some(&json!({"a": 1, "c": {}})));
    }

    #[test]
    fn test_raw_payload_is_returned_verbatim() {
        let mut cloud = MemoryCloud::new().with_raw_payload("teachers", "{not json");
        assert_eq!(cloud.get_documents("demo", "teachers").unwrap(), "{not json");
        assert_eq!(cloud.get_documents("demo", "students").unwrap(), "{}");
    }

    #[test]
    fn test_empty_collection_has_no_documents_field() {
        let mut cloud = MemoryCloud::new();
        let payload = cloud.get_documents("demo", "teachers").unwrap();
        assert_eq!(payload, "{}");
    }

    #[test]
    fn test_failure_flags() {
        let mut cloud = MemoryCloud::new().with_failures(FailureFlags {
            fetch: true,
            ..FailureFlags::default()
        });
        assert!(cloud.get_documents("demo", "students").is_err());
        assert_eq!(cloud.calls().fetch, 1);
    }

    #[test]
    fn test_error_reason_shapes() {
        assert_eq!(
            error_reason(401, r#"{"error": "Permission denied"}"#),
            "Permission denied (http 401)"
        );
        assert_eq!(
            error_reason(404, r#"{"error": {"code": 404, "message": "not found", "status": "NOT_FOUND"}}"#),
            "not found (http 404)"
        );
        assert_eq!(error_reason(502, "<html>bad gateway</html>"), "http status 502");
    }

    #[test]
    fn test_rest_readiness_follows_token() {
        let mut config = FirebaseConfig::default();
        config.require_auth = true;
        config.auth_token = Some(String::new());
        assert!(!FirestoreRtdb::new(&config).unwrap().is_ready());

        config.auth_token = Some("secret".to_string());
        assert!(FirestoreRtdb::new(&config).unwrap().is_ready());
    }

    #[test]
    fn test_rest_urls_escape_segments() {
        let rest = FirestoreRtdb::new(&FirebaseConfig::default()).unwrap();

        assert_eq!(
            rest.rtdb_url("/attendance/a?b#c/").as_str(),
            "https://attendance-demo-default-rtdb.firebaseio.com/attendance/a%3Fb%23c.json"
        );
        assert_eq!(
            rest.rtdb_url("").as_str(),
            "https://attendance-demo-default-rtdb.firebaseio.com/.json"
        );
        assert_eq!(
            rest.documents_url("p", "students?x").as_str(),
            "https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents/students%3Fx"
        );
    }

    #[test]
    fn test_get_documents_follows_page_tokens() {
        let (base, server) = serve_pages(vec![
            json!({"documents": [{"name": "s1"}], "nextPageToken": "tok2"}).to_string(),
            json!({"documents": [{"name": "s2"}]}).to_string(),
        ]);
        let mut config = FirebaseConfig::default();
        config.firestore_url = base;
        config.page_size = 1;
        let mut rest = FirestoreRtdb::new(&config).unwrap();

        let payload = rest.get_documents("p", "students").unwrap();
        let request_lines = server.join().unwrap();

        assert_eq!(
            serde_json::from_str::<Value>(&payload).unwrap(),
            json!({"documents": [{"name": "s1"}, {"name": "s2"}]})
        );
        assert_eq!(request_lines.len(), 2);
        assert!(request_lines[0].starts_with("GET /projects/p/databases/(default)/documents/students?pageSize=1 "));
        assert!(request_lines[1].contains("pageToken=tok2"));
    }
}
