//! In-memory Girder stand-in for offline tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

use reqwest::Method;
use serde_json::Value;

use crate::{
    client::GirderApi,
    errors::{Result, TransportError, TransportErrorKind},
    http::ApiResponse,
};

/// A request seen by [`MockGirder`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Canned responses keyed by method and path.
///
/// Each route answers from a queue; the last queued response repeats, which
/// suits status polling (`RUNNING`, `RUNNING`, `SUCCESS`, `SUCCESS`, ...).
/// Unrouted requests get a 404.
pub struct MockGirder {
    api_url: String,
    token: String,
    routes: Mutex<HashMap<(Method, String), VecDeque<ApiResponse>>>,
    unreachable: Mutex<HashSet<(Method, String)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for MockGirder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGirder {
    pub fn new() -> Self {
        Self {
            api_url: "http://mock.local/api/v1".to_string(),
            token: "mock-token".to_string(),
            routes: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_credentials(mut self, api_url: impl Into<String>, token: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self.token = token.into();
        self
    }

    pub fn respond(self, method: Method, path: &str, status: u16, body: impl Into<String>) -> Self {
        self.routes
            .lock()
            .expect("lock poisoned")
            .entry((method, normalize(path)))
            .or_default()
            .push_back(ApiResponse::new(status, body));
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: impl Into<String>) -> Self {
        self.respond(Method::GET, path, status, body)
    }

    pub fn on_get_json(self, path: &str, body: Value) -> Self {
        self.respond(Method::GET, path, 200, body.to_string())
    }

    pub fn on_post(self, path: &str, status: u16, body: impl Into<String>) -> Self {
        self.respond(Method::POST, path, status, body)
    }

    pub fn on_post_json(self, path: &str, body: Value) -> Self {
        self.respond(Method::POST, path, 200, body.to_string())
    }

    pub fn on_put_json(self, path: &str, body: Value) -> Self {
        self.respond(Method::PUT, path, 200, body.to_string())
    }

    /// Fail every request to `method` and `path` with a connect error.
    pub fn unreachable(self, method: Method, path: &str) -> Self {
        self.unreachable
            .lock()
            .expect("lock poisoned")
            .insert((method, normalize(path)));
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    /// Number of requests received for `method` and `path`.
    pub fn count(&self, method: Method, path: &str) -> usize {
        let path = normalize(path);
        self.calls
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    fn handle(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let path = normalize(path);
        self.calls.lock().expect("lock poisoned").push(RecordedCall {
            method: method.clone(),
            path: path.clone(),
            query: query.to_vec(),
            body: body.cloned(),
        });

        let key = (method.clone(), path.clone());
        if self.unreachable.lock().expect("lock poisoned").contains(&key) {
            return Err(TransportError {
                kind: TransportErrorKind::Connect,
                message: format!("connection refused for {method} {path}"),
                source: None,
                retries: None,
            }
            .into());
        }

        let mut routes = self.routes.lock().expect("lock poisoned");
        let response = match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| {
            ApiResponse::new(
                404,
                serde_json::json!({
                    "message": format!("no mock response for {method} {path}"),
                    "type": "mock"
                })
                .to_string(),
            )
        }))
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

impl GirderApi for MockGirder {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn get(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse> {
        self.handle(Method::GET, path, query, None)
    }

    fn post(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse> {
        self.handle(Method::POST, path, query, None)
    }

    fn put(&self, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        self.handle(Method::PUT, path, &[], body)
    }
}

/// Canned payloads shared by tests.
pub mod fixtures {
    use serde_json::{Value, json};

    use crate::{job::JobStatus, mock::MockGirder};

    /// Descriptor with two named inputs (`input_image` required, `threshold`
    /// defaulted) in one group.
    pub const SIMPLE_DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<executable>
  <title>Simple Plugin</title>
  <description>Fixture</description>
  <parameters>
    <label>IO</label>
    <image>
      <name>input_image</name>
      <label>Input Image</label>
      <channel>input</channel>
    </image>
    <integer>
      <name>threshold</name>
      <label>Threshold</label>
      <default>150</default>
    </integer>
  </parameters>
</executable>"#;

    /// Job resource body with a numeric status code and log lines.
    pub fn job_resource(id: &str, status: JobStatus, log: &[&str]) -> Value {
        json!({ "_id": id, "status": status.code(), "log": log })
    }

    /// Register plugin `plugin_id` with `SIMPLE_DESCRIPTOR` and a run endpoint creating `job_id`.
    pub fn with_simple_plugin(api: MockGirder, plugin_id: &str, job_id: &str) -> MockGirder {
        api.on_get(
            &format!("slicer_cli_web/cli/{plugin_id}/xml"),
            200,
            SIMPLE_DESCRIPTOR,
        )
        .on_post_json(
            &format!("slicer_cli_web/cli/{plugin_id}/run"),
            job_resource(job_id, JobStatus::Inactive, &[]),
        )
    }
}
