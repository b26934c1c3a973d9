use std::{env, sync::Arc, thread, time::Duration};

use reqwest::{
    Method, StatusCode, Url,
    blocking::{Client as HttpClient, RequestBuilder, Response},
    header::ACCEPT,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    API_URL_ENV, DEFAULT_CLIENT_HEADER, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    TOKEN_ENV, TOKEN_HEADER,
    client::GirderApi,
    errors::{Error, Result, RetryMetadata, TransportError, TransportErrorKind},
    http::{ApiResponse, RetryConfig},
};

#[derive(Clone, Debug, Default)]
pub struct GirderConfig {
    /// Base API URL, e.g. `https://dsa.example.org/api/v1`.
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub client_header: Option<String>,
    pub http_client: Option<HttpClient>,
    /// Override the connect timeout (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Override the request timeout (defaults to 60s).
    pub timeout: Option<Duration>,
    /// Retry/backoff policy (defaults to 3 attempts, exponential backoff + jitter).
    pub retry: Option<RetryConfig>,
}

impl GirderConfig {
    /// Read `GIRDER_API_URL` and `GIRDER_TOKEN` from the environment.
    pub fn from_env() -> Self {
        Self {
            api_url: env::var(API_URL_ENV).ok().filter(|v| !v.trim().is_empty()),
            token: env::var(TOKEN_ENV).ok().filter(|v| !v.trim().is_empty()),
            ..Default::default()
        }
    }
}

/// Blocking Girder client backed by `reqwest`.
#[derive(Clone)]
pub struct GirderClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    api_url: String,
    base_url: Url,
    token: String,
    client_header: Option<String>,
    http: HttpClient,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl GirderClient {
    pub fn new(cfg: GirderConfig) -> Result<Self> {
        let token = cfg
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Config("girder token is required".to_string()))?;
        Self::build(cfg, token)
    }

    /// Authenticate with username and password and build a client around the issued token.
    pub fn login(cfg: GirderConfig, username: &str, password: &str) -> Result<Self> {
        if username.trim().is_empty() {
            return Err(Error::Config("username is required".into()));
        }
        let anonymous = Self::build(cfg.clone(), String::new())?;
        let builder = anonymous
            .inner
            .request(Method::GET, "user/authentication")?
            .basic_auth(username, Some(password));
        let builder = anonymous.inner.with_headers(builder);
        let resp = anonymous
            .inner
            .send_with_retry(builder, Method::GET, anonymous.inner.retry.clone())?;
        let auth: AuthenticationResponse = resp.into_json()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(user = username, "authenticated against girder");

        Self::build(cfg, auth.auth_token.token)
    }

    fn build(cfg: GirderConfig, token: String) -> Result<Self> {
        let api_url = cfg
            .api_url
            .ok_or_else(|| Error::Config("girder api url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();
        // Trailing slash so relative joins stay under the API prefix.
        let base_url = Url::parse(&format!("{api_url}/"))
            .map_err(|err| Error::Config(format!("invalid api url: {err}")))?;

        let connect_timeout = cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let request_timeout = cfg.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let retry = cfg.retry.unwrap_or_default();

        let http = match cfg.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .connect_timeout(connect_timeout)
                .build()
                .map_err(|err| TransportError {
                    kind: TransportErrorKind::Connect,
                    message: "failed to build http client".to_string(),
                    source: Some(err),
                    retries: None,
                })?,
        };

        let client_header = cfg
            .client_header
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(DEFAULT_CLIENT_HEADER.to_string()));

        Ok(Self {
            inner: Arc::new(ClientInner {
                api_url,
                base_url,
                token,
                client_header,
                http,
                request_timeout,
                retry,
            }),
        })
    }

    fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let mut builder = self.inner.request(method.clone(), path)?;
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let builder = self.inner.with_headers(builder);
        self.inner
            .send_with_retry(builder, method, self.inner.retry.clone())
    }
}

impl GirderApi for GirderClient {
    fn api_url(&self) -> &str {
        &self.inner.api_url
    }

    fn token(&self) -> &str {
        &self.inner.token
    }

    fn get(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse> {
        self.call(Method::GET, path, query, None)
    }

    fn post(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse> {
        self.call(Method::POST, path, query, None)
    }

    fn put(&self, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        self.call(Method::PUT, path, &[], body)
    }
}

impl ClientInner {
    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path).map_err(|err| Error::Config(err.to_string()))?
        } else {
            self.base_url
                .join(path.trim_start_matches('/'))
                .map_err(|err| Error::Config(format!("invalid path: {err}")))?
        };
        Ok(self.http.request(method, url))
    }

    fn with_headers(&self, mut builder: RequestBuilder) -> RequestBuilder {
        builder = builder
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout);
        if let Some(client_header) = self.client_header.as_deref() {
            builder = builder.header(reqwest::header::USER_AGENT, client_header);
        }
        if !self.token.trim().is_empty() {
            builder = builder.header(TOKEN_HEADER, self.token.trim());
        }
        builder
    }

    fn send_with_retry(
        &self,
        builder: RequestBuilder,
        method: Method,
        retry: RetryConfig,
    ) -> Result<ApiResponse> {
        let max_attempts = retry.max_attempts.max(1);
        let mut state = RetryState::new();

        for attempt in 1..=max_attempts {
            let attempt_builder = builder
                .try_clone()
                .ok_or_else(|| Error::Config("request body is not cloneable for retry".into()))?;
            #[cfg(feature = "tracing")]
            let span = tracing::debug_span!("girder.http", method = %method, attempt, max_attempts);
            #[cfg(feature = "tracing")]
            let _guard = span.enter();
            let result = attempt_builder.send();

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    state.record_attempt(attempt);
                    if !status.is_success() {
                        state.record_status(status);
                        if retry.should_retry_status(&method, status) && attempt < max_attempts {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(status = %status, attempt, "retrying request");
                            thread::sleep(retry.backoff_delay(attempt));
                            continue;
                        }
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(status = %status, "request completed");
                    return self.read_response(resp, state.metadata());
                }
                Err(err) => {
                    state.record_attempt(attempt);
                    state.record_error(&err);
                    if retry.should_retry_error(&method, &err) && attempt < max_attempts {
                        thread::sleep(retry.backoff_delay(attempt));
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, error = %err, "transport error");
                    return Err(self.to_transport_error(err, state.metadata()));
                }
            }
        }

        Err(Error::Transport(TransportError {
            kind: TransportErrorKind::Other,
            message: "request failed".to_string(),
            source: None,
            retries: state.metadata(),
        }))
    }

    fn read_response(&self, resp: Response, retries: Option<RetryMetadata>) -> Result<ApiResponse> {
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|err| self.to_transport_error(err, retries.clone()))?;
        Ok(ApiResponse {
            status,
            body,
            retries,
        })
    }

    fn to_transport_error(&self, err: reqwest::Error, retries: Option<RetryMetadata>) -> Error {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };

        TransportError {
            kind,
            message: err.to_string(),
            source: Some(err),
            retries,
        }
        .into()
    }
}

#[derive(Default)]
struct RetryState {
    attempts: u32,
    last_status: Option<u16>,
    last_error: Option<String>,
}

impl RetryState {
    fn new() -> Self {
        Self {
            attempts: 0,
            last_status: None,
            last_error: None,
        }
    }

    fn record_attempt(&mut self, attempt: u32) {
        self.attempts = attempt;
    }

    fn record_status(&mut self, status: StatusCode) {
        self.last_status = Some(status.as_u16());
    }

    fn record_error(&mut self, err: &reqwest::Error) {
        self.last_error = Some(err.to_string());
    }

    fn metadata(&self) -> Option<RetryMetadata> {
        if self.attempts <= 1 {
            None
        } else {
            Some(RetryMetadata {
                attempts: self.attempts,
                last_status: self.last_status,
                last_error: self.last_error.clone(),
            })
        }
    }
}

#[derive(Deserialize)]
struct AuthenticationResponse {
    #[serde(rename = "authToken")]
    auth_token: AuthToken,
}

#[derive(Deserialize)]
struct AuthToken {
    token: String,
}
