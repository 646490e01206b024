//! Foreman API - HTTPS transport for the Jules API
//!
//! This crate provides the production [`Transport`](foreman_core::Transport)
//! used by the worker manager: URL construction against the versioned API
//! root, credential header injection, and mapping of HTTP failures onto
//! [`TransportError`](foreman_core::TransportError).

mod http;

pub use http::{HttpTransport, API_KEY_HEADER};
