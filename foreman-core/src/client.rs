//! Typed client for the Jules sessions API
//!
//! Wraps a [`Transport`] with retry and throughput accounting. Every attempt,
//! including failed ones and retries, is reported to the recorder.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::metrics::ThroughputRecorder;
use crate::retry::RetryPolicy;
use crate::session::{Activity, NewSession, RemoteState};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

/// Page size requested when listing activities
pub const ACTIVITY_PAGE_SIZE: u32 = 50;

/// Upper bound on pages followed by [`ApiClient::list_all_activities`]
pub const MAX_ACTIVITY_PAGES: usize = 100;

/// Session as returned by the remote service
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSession {
    pub id: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub state: Option<RemoteState>,
    pub raw: Value,
}

impl RemoteSession {
    /// Decode a session body, taking the id from `id` or the last segment
    /// of `name` (`sessions/{id}`)
    pub fn from_wire(body: Value) -> std::result::Result<Self, TransportError> {
        let name = body.get("name").and_then(Value::as_str).map(String::from);
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| {
                name.as_deref()
                    .and_then(|n| n.rsplit('/').next())
                    .map(String::from)
            })
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                TransportError::Serialization("Session response has no id or name".to_string())
            })?;

        let state = body
            .get("state")
            .and_then(Value::as_str)
            .map(|s| RemoteState::from(s.to_string()));
        let title = body.get("title").and_then(Value::as_str).map(String::from);

        Ok(Self {
            id,
            name,
            title,
            state,
            raw: body,
        })
    }
}

/// One page of a session's activity listing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityPage {
    pub activities: Vec<Activity>,
    pub next_page_token: Option<String>,
}

/// Mutable session fields accepted by `PATCH sessions/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
    }
}

/// Retrying, metered client for the remote API
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    recorder: Arc<ThroughputRecorder>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn session_path(session_id: &str) -> String {
    format!("sessions/{}", session_id)
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        recorder: Arc<ThroughputRecorder>,
    ) -> Self {
        Self {
            transport,
            retry,
            recorder,
        }
    }

    pub fn recorder(&self) -> &Arc<ThroughputRecorder> {
        &self.recorder
    }

    /// Send a request through the retry loop, metering every attempt
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let operation = format!("{} {}", request.method, request.path);
        let bytes_sent = request.body_len();

        let response = self
            .retry
            .run(&operation, || {
                let request = request.clone();
                async move {
                    let started = Instant::now();
                    let result = self.transport.request(request).await;
                    let elapsed = started.elapsed();
                    match &result {
                        Ok(resp) => {
                            self.recorder
                                .record_request(elapsed, true, bytes_sent, resp.bytes_received);
                        }
                        Err(_) => self.recorder.record_request(elapsed, false, bytes_sent, 0),
                    }
                    result
                }
            })
            .await?;

        debug!(%operation, status = response.status, "Request completed");
        Ok(response)
    }

    /// `POST sessions`
    pub async fn create_session(&self, params: &NewSession) -> Result<RemoteSession> {
        let body = json!({
            "prompt": params.prompt,
            "sourceContext": {
                "source": params.source,
                "githubRepoContext": {
                    "startingBranch": params.branch,
                },
            },
            "title": params.title,
        });
        let response = self.send(ApiRequest::post("sessions", body)).await?;
        let session = RemoteSession::from_wire(response.body)?;
        info!(session_id = %session.id, title = %params.title, "Created remote session");
        Ok(session)
    }

    /// `GET sessions/{id}`
    pub async fn get_session(&self, session_id: &str) -> Result<RemoteSession> {
        let response = self.send(ApiRequest::get(session_path(session_id))).await?;
        Ok(RemoteSession::from_wire(response.body)?)
    }

    /// `GET sessions/{id}/activities` for a single page
    ///
    /// `offset` is the position of the first entry of this page in the full
    /// listing and becomes the sequence of activities that carry none.
    pub async fn list_activities(
        &self,
        session_id: &str,
        page_token: Option<&str>,
        offset: u64,
    ) -> Result<ActivityPage> {
        let mut request = ApiRequest::get(format!("{}/activities", session_path(session_id)))
            .with_query("pageSize", ACTIVITY_PAGE_SIZE.to_string());
        if let Some(token) = page_token {
            request = request.with_query("pageToken", token);
        }

        let response = self.send(request).await?;
        let activities = response
            .body
            .get("activities")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Activity::from_wire(item, offset + i as u64))
                    .collect()
            })
            .unwrap_or_default();
        let next_page_token = response
            .body
            .get("nextPageToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(String::from);

        Ok(ActivityPage {
            activities,
            next_page_token,
        })
    }

    /// Every activity of a session, following `nextPageToken`
    pub async fn list_all_activities(&self, session_id: &str) -> Result<Vec<Activity>> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;

        for _ in 0..MAX_ACTIVITY_PAGES {
            let page = self
                .list_activities(session_id, token.as_deref(), all.len() as u64)
                .await?;
            all.extend(page.activities);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(all),
            }
        }

        debug!(session_id, pages = MAX_ACTIVITY_PAGES, "Activity page limit reached");
        Ok(all)
    }

    async fn answer_plan(&self, session_id: &str, approved: bool, feedback: &str) -> Result<()> {
        let body = json!({
            "approvalData": {
                "approved": approved,
                "feedback": feedback,
            }
        });
        self.send(ApiRequest::post(
            format!("{}:approvePlan", session_path(session_id)),
            body,
        ))
        .await?;
        Ok(())
    }

    /// `POST sessions/{id}:approvePlan` with `approved = true`
    pub async fn approve_plan(&self, session_id: &str) -> Result<()> {
        self.answer_plan(session_id, true, "").await?;
        info!(session_id, "Approved plan");
        Ok(())
    }

    /// `POST sessions/{id}:approvePlan` with `approved = false`
    pub async fn reject_plan(&self, session_id: &str, feedback: &str) -> Result<()> {
        self.answer_plan(session_id, false, feedback).await?;
        info!(session_id, "Rejected plan");
        Ok(())
    }

    /// `POST sessions/{id}/activities` carrying a user message
    pub async fn send_message(&self, session_id: &str, message: &str) -> Result<()> {
        let body = json!({ "userMessage": { "message": message } });
        self.send(ApiRequest::post(
            format!("{}/activities", session_path(session_id)),
            body,
        ))
        .await?;
        Ok(())
    }

    /// `PATCH sessions/{id}`
    pub async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<RemoteSession> {
        let body = serde_json::to_value(update)?;
        let response = self
            .send(ApiRequest::new(Method::Patch, session_path(session_id)).with_body(body))
            .await?;
        if response.body.is_null() {
            // some deployments answer PATCH with an empty body
            return self.get_session(session_id).await;
        }
        Ok(RemoteSession::from_wire(response.body)?)
    }

    /// `DELETE sessions/{id}`
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.send(ApiRequest::new(Method::Delete, session_path(session_id)))
            .await?;
        Ok(())
    }
}
