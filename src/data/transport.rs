//! HTTP transport used by every API client
//!
//! The `Transport` trait is the narrow seam between the clients and the network.
//! `HttpTransport` implements it with reqwest, resolving relative Cloud Foundry
//! paths against the targeted API endpoint and applying the TLS settings of the
//! CF CLI (disabled verification, additional root CA).

use std::future::Future;
use std::path::PathBuf;

use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest::{Certificate, Client, Method};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors that can occur when talking to an API
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network or TLS failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("unexpected response from {url}: [{status}] {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// Response body is not valid JSON or does not match the expected schema
    #[error("failed to parse JSON response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    /// URL is neither absolute nor an API path
    #[error("invalid URL: '{0}'")]
    InvalidUrl(String),

    /// Lookup found no matching resource
    #[error("{0}")]
    NotFound(String),

    /// Asynchronous job ended in FAILED state
    #[error("job {url} failed: {message}")]
    JobFailed { url: String, message: String },

    /// Asynchronous job did not finish in the allowed number of polls
    #[error("job {0} did not complete in time")]
    JobTimeout(String),

    /// Response lacks a link that the flow depends on
    #[error("malformed {resource}: no '{link}' link")]
    MissingLink {
        resource: &'static str,
        link: &'static str,
    },

    /// Service key credentials lack a field needed to call the service
    #[error("service key credentials have no '{0}' field")]
    MissingCredentials(&'static str),

    /// Additional root CA could not be read or parsed
    #[error("could not load CA certificate {path}: {reason}")]
    Certificate { path: PathBuf, reason: String },
}

/// Authorization applied to a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// The transport's own Cloud Foundry token
    #[default]
    Default,
    /// OAuth access token of a service key
    Bearer(String),
    /// Client id and secret for the token endpoint
    Basic { username: String, password: String },
}

/// Request body
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A single API request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub auth: Auth,
    pub body: Body,
}

impl ApiRequest {
    /// Creates a request without body using the default authorization
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            auth: Auth::Default,
            body: Body::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Authorizes the request with a service access token
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = Auth::Bearer(token.into());
        self
    }

    /// Authorizes the request with client credentials
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Auth::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = Body::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

/// Raw response of an API request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// Value of the `Location` header, set by endpoints that start a job
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Fails with `UnexpectedStatus` unless the status is 2xx
    pub fn error_for_status(self, url: &str) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.unexpected(url))
        }
    }

    /// Fails with `UnexpectedStatus` unless the status is one of `expected`
    pub fn expect_status(self, expected: &[u16], url: &str) -> Result<Self, ApiError> {
        if expected.contains(&self.status) {
            Ok(self)
        } else {
            Err(self.unexpected(url))
        }
    }

    fn unexpected(&self, url: &str) -> ApiError {
        ApiError::UnexpectedStatus {
            url: url.to_string(),
            status: self.status,
            body: self.text(),
        }
    }
}

/// Sends API requests
///
/// Implementations perform exactly one network exchange per call; retries and
/// pagination are layered on top by the clients.
pub trait Transport {
    fn send(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse, ApiError>>;
}

/// TLS settings taken from the CF CLI configuration and environment
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Skip certificate verification (`cf api --skip-ssl-validation`)
    pub insecure: bool,
    /// PEM file with an additional root CA
    pub ca_path: Option<PathBuf>,
}

/// Transport backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_endpoint: String,
    /// Authorization header value for Cloud Foundry requests, e.g. `bearer eyJ...`
    authorization: Option<String>,
}

impl HttpTransport {
    /// Creates a transport for the given API endpoint
    pub fn new(
        api_endpoint: impl Into<String>,
        authorization: Option<String>,
        tls: &TlsOptions,
    ) -> Result<Self, ApiError> {
        let mut builder = Client::builder().danger_accept_invalid_certs(tls.insecure);
        if let Some(path) = &tls.ca_path {
            let pem = std::fs::read(path).map_err(|e| ApiError::Certificate {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|e| ApiError::Certificate {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        Ok(Self::with_client(builder.build()?, api_endpoint, authorization))
    }

    /// Creates a transport with a custom HTTP client
    pub fn with_client(
        client: Client,
        api_endpoint: impl Into<String>,
        authorization: Option<String>,
    ) -> Self {
        Self {
            client,
            api_endpoint: api_endpoint.into().trim_end_matches('/').to_string(),
            authorization,
        }
    }

    /// Resolves API paths against the endpoint; absolute URLs pass through
    pub fn resolve(&self, url: &str) -> Result<String, ApiError> {
        if url.starts_with("https://") || url.starts_with("http://") {
            Ok(url.to_string())
        } else if url.starts_with('/') {
            Ok(format!("{}{}", self.api_endpoint, url))
        } else {
            Err(ApiError::InvalidUrl(url.to_string()))
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.resolve(&request.url)?;
        tracing::trace!(method = %request.method, url = %url, "Making request");

        let mut builder = self.client.request(request.method, &url);
        builder = match request.auth {
            Auth::Default => match &self.authorization {
                Some(value) => builder.header(AUTHORIZATION, value),
                None => builder,
            },
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        };
        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Form(fields) => builder.form(&fields),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        tracing::trace!(
            status,
            url = %url,
            body = %redact_body(&body),
            "Received response"
        );

        Ok(ApiResponse {
            status,
            location,
            body,
        })
    }
}

/// Response fields never logged in clear
const SECRET_FIELDS: &[&str] = &["access_token", "refresh_token", "clientsecret", "password"];

/// Renders a response body for logging with secret fields masked
///
/// Bodies that are not JSON are reduced to their length.
pub fn redact_body(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(mut value) => {
            mask_secret_fields(&mut value);
            value.to_string()
        }
        Err(_) => format!("<{} bytes>", body.len()),
    }
}

fn mask_secret_fields(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if SECRET_FIELDS.contains(&key.as_str()) {
                    if let serde_json::Value::String(secret) = field {
                        *secret = mask_secret(secret);
                        continue;
                    }
                }
                mask_secret_fields(field);
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(mask_secret_fields),
        _ => {}
    }
}

/// Masks a secret for logging, keeping only a short prefix
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", prefix)
    }
}
