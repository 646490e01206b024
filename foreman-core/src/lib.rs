//! Foreman Core - session orchestration for remote coding workers
//!
//! This crate creates sessions on the Jules API, polls them for activity,
//! drives each session's lifecycle state machine and fans activity out to
//! notification handlers, with retry, rate limiting and throughput
//! accounting around every remote call.

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod notify;
pub mod rate_limit;
pub mod retry;
pub mod secrets;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ApiClient, RemoteSession, SessionUpdate};
pub use config::{CliOverrides, Config};
pub use error::{Error, Result, TransportError};
pub use manager::WorkerManager;
pub use metrics::{ThroughputRecorder, ThroughputReport};
pub use notify::{
    CompletionSummary, HandlerError, HandlerId, NotificationDispatcher, NotificationHandler,
};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use secrets::Secrets;
pub use session::{Activity, ActivityKind, SessionState, WorkerStatus};
pub use transport::{ApiRequest, ApiResponse, Method, Transport};
