//! Transport abstraction between the API client and the network
//!
//! The production implementation lives in `foreman-api`; tests plug in an
//! in-memory fake.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request relative to the versioned API root
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to `{base_url}/{api_version}/`, e.g. `sessions/abc`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Serialized length of the body, for byte accounting
    pub fn body_len(&self) -> usize {
        self.body
            .as_ref()
            .and_then(|b| serde_json::to_vec(b).ok())
            .map_or(0, |b| b.len())
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when the body was empty
    pub body: Value,
    pub bytes_received: usize,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        let bytes_received = serde_json::to_vec(&body).map_or(0, |b| b.len());
        Self {
            status: 200,
            body,
            bytes_received,
        }
    }
}

/// A single network round trip; no retries
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}
