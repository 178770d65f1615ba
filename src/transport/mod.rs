//! Outbound network boundary.
//!
//! # Responsibilities
//! - Describe one outbound call (method, URL, headers, body)
//! - Carry the raw response (status, headers, body) back up the pipeline
//! - Hide the HTTP client behind a trait so the pipeline can be driven
//!   by scripted transports in tests
//!
//! # Design Decisions
//! - Non-success statuses are still `Ok` here; classification happens
//!   one layer up, so the pool releases slots regardless of outcome
//! - Response bodies are shared behind `Arc` so coalesced callers clone cheaply

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::FetchError;

pub use self::http::HttpTransport;

/// Performs a single raw network call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Caller-facing options for one logical fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Overrides the configured deadline for this call.
    pub timeout_ms: Option<u64>,
    /// Force coalescing on or off; by default only GET/HEAD are coalesced.
    pub dedup: Option<bool>,
    /// Name used in logs and deadline records; defaults to "METHOD url".
    pub label: Option<String>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON request body.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, FetchError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| FetchError::InvalidRequest(format!("unserializable body: {}", e)))?;
        self.body = Some(body);
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn dedup(mut self, dedup: bool) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether requests with these options may be coalesced.
    pub fn coalescable(&self) -> bool {
        self.dedup
            .unwrap_or(self.method == Method::GET || self.method == Method::HEAD)
    }
}

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    /// Resolve a URL string and caller options into a request.
    pub fn new(url: &str, options: &FetchOptions) -> Result<Self, FetchError> {
        let url = Url::parse(url)
            .map_err(|e| FetchError::InvalidRequest(format!("bad url '{}': {}", url, e)))?;
        Ok(Self {
            method: options.method.clone(),
            url,
            headers: options.headers.clone(),
            body: options.body.clone(),
        })
    }

    pub fn get(url: &str) -> Result<Self, FetchError> {
        Self::new(url, &FetchOptions::default())
    }
}

/// Raw response from the origin.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Arc<Vec<u8>>,
}

impl FetchResponse {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Vec::new(),
            body: Arc::new(body.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-success status into `FetchError::Http`.
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Http {
                status: self.status,
                body: String::from_utf8_lossy(&self.body[..self.body.len().min(512)]).into_owned(),
                url: self.url,
            })
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}
