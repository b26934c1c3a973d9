//! The narrow contract the job layer needs from a Girder connection.

use std::sync::Arc;

use serde_json::Value;

use crate::{errors::Result, http::ApiResponse};

/// Query-string parameters, in the order they are sent.
pub type Query = Vec<(String, String)>;

/// Capabilities of an authenticated Girder API connection.
///
/// Implementations return the raw [`ApiResponse`] for every status code;
/// only transport failures (timeouts, connection errors) are errors here.
/// The connection is shared read-only between jobs.
pub trait GirderApi: Send + Sync {
    /// Base API URL, e.g. `https://dsa.example.org/api/v1`.
    fn api_url(&self) -> &str;

    /// Active Girder auth token.
    fn token(&self) -> &str;

    fn get(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse>;

    fn post(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse>;

    fn put(&self, path: &str, body: Option<&Value>) -> Result<ApiResponse>;
}

/// Shared handle to a Girder connection.
pub type SharedApi = Arc<dyn GirderApi>;

pub(crate) fn query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Query
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// `token` query parameter expected by the `slicer_cli_web` endpoints.
pub(crate) fn token_query(api: &dyn GirderApi) -> Query {
    query([("token", api.token())])
}
