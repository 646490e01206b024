//! Worker manager: owns the session registry and one polling task per
//! active session
//!
//! Each session lives behind its own async lock. The polling task is the
//! only writer for polled data and never holds the lock across network I/O;
//! operator calls that gate on state (approve, reject, cancel) hold it across
//! their remote call so the check and the transition are atomic.

mod poller;

pub use poller::POLLING_TIMEOUT_REASON;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{ApiClient, SessionUpdate};
use crate::config::{Config, PollingConfig};
use crate::error::{Error, Result};
use crate::metrics::{ThroughputRecorder, ThroughputReport};
use crate::notify::NotificationDispatcher;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::session::{
    truncate_text, Activity, NewSession, SessionRecord, SessionState, Trigger, WorkerStatus,
};
use crate::transport::Transport;

use poller::Poller;

/// Rate limiter key for session creation
pub const CREATE_RESOURCE: &str = "sessions";

/// Starting branch used when none is given
pub const DEFAULT_BRANCH: &str = "main";

/// Rate limiter key for one session's poll cycles
pub fn activities_resource(session_id: &str) -> String {
    format!("sessions/{}/activities", session_id)
}

/// Registry entry shared between the manager and the session's poller
#[derive(Clone)]
struct SessionEntry {
    record: Arc<AsyncMutex<SessionRecord>>,
    /// Cancelled once the session will not be polled again
    done: CancellationToken,
}

struct ActivePoller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    client: ApiClient,
    limiter: RateLimiter,
    recorder: Arc<ThroughputRecorder>,
    dispatcher: Arc<NotificationDispatcher>,
    polling: PollingConfig,
    /// Every session created by this manager, finished ones included, so
    /// status and activity queries keep working after completion. Entries
    /// live as long as the manager.
    sessions: Mutex<HashMap<String, SessionEntry>>,
    active: Mutex<HashMap<String, ActivePoller>>,
}

/// Creates, polls and steers remote worker sessions
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("active", &self.active_count())
            .field("polling", &self.inner.polling)
            .finish_non_exhaustive()
    }
}

/// Default title: `"Task: <first 50 chars of prompt>..."`
pub fn default_title(prompt: &str) -> String {
    format!("Task: {}...", prompt.chars().take(50).collect::<String>())
}

fn invalid_state(session_id: &str, state: SessionState, operation: &'static str) -> Error {
    Error::InvalidState {
        session_id: session_id.to_string(),
        state,
        operation,
    }
}

impl WorkerManager {
    /// Build a manager over `transport` using the retry, polling and rate
    /// limit settings from `config`
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let recorder = Arc::new(ThroughputRecorder::new());
        let client = ApiClient::new(
            transport,
            RetryPolicy::from_config(&config.retry),
            Arc::clone(&recorder),
        );
        Self::with_client(client, RateLimiter::from_config(&config.rate_limit), config.polling.clone())
    }

    pub fn with_client(client: ApiClient, limiter: RateLimiter, polling: PollingConfig) -> Self {
        let recorder = Arc::clone(client.recorder());
        Self {
            inner: Arc::new(Inner {
                client,
                limiter,
                recorder,
                dispatcher: Arc::new(NotificationDispatcher::new()),
                polling,
                sessions: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn recorder(&self) -> &Arc<ThroughputRecorder> {
        &self.inner.recorder
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.inner.dispatcher
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.inner.polling
    }

    fn entry(&self, session_id: &str) -> Result<SessionEntry> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(session_id.to_string()))
    }

    fn active_count(&self) -> usize {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn update_active_gauge(&self) {
        self.inner.recorder.set_active_sessions(self.active_count());
    }

    /// Create a remote session and start polling it
    ///
    /// `title` defaults to `"Task: <prompt prefix>..."` and `branch` to
    /// `main`.
    pub async fn create_worker(
        &self,
        prompt: impl Into<String>,
        source: impl Into<String>,
        title: Option<String>,
        branch: Option<String>,
    ) -> Result<String> {
        let prompt = prompt.into();
        let source = source.into();
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }
        if source.trim().is_empty() {
            return Err(Error::Validation("source must not be empty".to_string()));
        }

        if !self.inner.limiter.can_call(CREATE_RESOURCE) {
            warn!(resource = CREATE_RESOURCE, "Session creation rate limited");
            return Err(Error::RateLimited {
                resource: CREATE_RESOURCE.to_string(),
            });
        }

        let params = NewSession {
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| default_title(&prompt)),
            branch: branch
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            prompt,
            source,
        };

        let remote = self.inner.client.create_session(&params).await?;
        let session_id = remote.id.clone();
        let mut record = SessionRecord::new(session_id.clone(), params);
        if let Some(state) = remote.state {
            record.apply_remote_state(state);
        }

        let entry = SessionEntry {
            record: Arc::new(AsyncMutex::new(record)),
            done: CancellationToken::new(),
        };
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.clone(), entry.clone());

        self.spawn_poller(&session_id, entry);
        info!(session_id = %session_id, "Worker created");
        Ok(session_id)
    }

    fn spawn_poller(&self, session_id: &str, entry: SessionEntry) {
        let cancel = CancellationToken::new();
        let poller = Poller::new(self.clone(), session_id.to_string(), entry, cancel.clone());

        // held across spawn so a fast-finishing poller cannot race its own
        // registration
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        let task = tokio::spawn(poller.run());
        active.insert(session_id.to_string(), ActivePoller { cancel, task });
        let count = active.len();
        drop(active);
        self.inner.recorder.set_active_sessions(count);
    }

    /// Called by a poller on exit; drops the session's limiter window since
    /// nothing polls it again
    fn finish_polling(&self, session_id: &str, entry: &SessionEntry) {
        let removed = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .is_some();
        self.inner.limiter.forget(&activities_resource(session_id));
        entry.done.cancel();
        if removed {
            info!(session_id, "Polling stopped");
        }
        self.update_active_gauge();
    }

    pub async fn get_status(&self, session_id: &str) -> Result<WorkerStatus> {
        let entry = self.entry(session_id)?;
        let record = entry.record.lock().await;
        Ok(record.status())
    }

    /// Answer a pending plan, holding the session lock across the remote call
    async fn answer_plan(
        &self,
        session_id: &str,
        trigger: Trigger,
        feedback: &str,
    ) -> Result<WorkerStatus> {
        let operation = match &trigger {
            Trigger::Reject => "reject plan for",
            Trigger::AutoApprove => "auto-approve plan for",
            _ => "approve plan for",
        };
        let entry = self.entry(session_id)?;
        let mut record = entry.record.lock().await;
        let state = record.state();
        if state != SessionState::WaitingApproval {
            return Err(invalid_state(session_id, state, operation));
        }

        match &trigger {
            Trigger::Reject => self.inner.client.reject_plan(session_id, feedback).await?,
            _ => self.inner.client.approve_plan(session_id).await?,
        }

        record
            .fire(trigger)
            .map_err(|e| invalid_state(session_id, e.from, operation))?;
        Ok(record.status())
    }

    /// Approve the pending plan; only valid in `WAITING_APPROVAL`
    pub async fn approve_plan(&self, session_id: &str) -> Result<WorkerStatus> {
        self.answer_plan(session_id, Trigger::Approve, "").await
    }

    /// Reject the pending plan with feedback; the session returns to
    /// `PLANNING`
    pub async fn reject_plan(&self, session_id: &str, feedback: &str) -> Result<WorkerStatus> {
        self.answer_plan(session_id, Trigger::Reject, feedback).await
    }

    /// Send a free-text message to the remote agent, whatever the local
    /// state
    pub async fn send_message(&self, session_id: &str, message: &str) -> Result<WorkerStatus> {
        if message.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }
        let entry = self.entry(session_id)?;
        self.inner.client.send_message(session_id, message).await?;

        let mut record = entry.record.lock().await;
        record.clear_blocker(Instant::now());
        info!(session_id, message = %truncate_text(message, 50), "Message sent");
        Ok(record.status())
    }

    /// Stop polling and cancel the session locally and remotely
    ///
    /// Local polling stops before this returns. The remote delete is best
    /// effort. Cancelling a session that is already terminal only stops
    /// its poller.
    pub async fn cancel_session(&self, session_id: &str) -> Result<WorkerStatus> {
        let entry = self.entry(session_id)?;
        let poller = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(poller) = &poller {
            poller.cancel.cancel();
        }
        self.update_active_gauge();

        let (status, summary) = {
            let mut record = entry.record.lock().await;
            if record.state().is_terminal() {
                entry.done.cancel();
                return Ok(record.status());
            }

            if let Err(e) = self.inner.client.delete_session(session_id).await {
                warn!(session_id, error = %e, "Remote cancel failed");
            }
            record
                .fire(Trigger::Cancel)
                .map_err(|e| invalid_state(session_id, e.from, "cancel"))?;
            (record.status(), record.take_completion())
        };

        entry.done.cancel();
        info!(session_id, "Session cancelled");
        if let Some(summary) = summary {
            self.inner.dispatcher.notify_completion(&summary);
        }
        Ok(status)
    }

    /// Ledger contents, most recent first
    pub async fn get_activities(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Activity>> {
        let entry = self.entry(session_id)?;
        let record = entry.record.lock().await;
        Ok(record.ledger().recent(limit))
    }

    /// Status of every session that is still being polled
    pub async fn list_active(&self) -> Vec<WorkerStatus> {
        let ids: Vec<String> = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(status) = self.get_status(&id).await {
                statuses.push(status);
            }
        }
        statuses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        statuses
    }

    /// Status of every known session, including finished ones
    pub async fn list_sessions(&self) -> Vec<WorkerStatus> {
        let entries: Vec<SessionEntry> = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let mut statuses = Vec::with_capacity(entries.len());
        for entry in entries {
            statuses.push(entry.record.lock().await.status());
        }
        statuses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        statuses
    }

    /// Patch mutable remote fields and mirror them locally
    pub async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<WorkerStatus> {
        if update.is_empty() {
            return Err(Error::Validation("update has no fields set".to_string()));
        }
        let entry = self.entry(session_id)?;
        let remote = self.inner.client.update_session(session_id, &update).await?;

        let mut record = entry.record.lock().await;
        if let Some(title) = remote.title.filter(|t| !t.is_empty()).or(update.title) {
            record.set_title(title);
        }
        info!(session_id, "Session updated");
        Ok(record.status())
    }

    /// Clear the blocked flag after operator intervention
    pub async fn clear_blocker(&self, session_id: &str) -> Result<bool> {
        let entry = self.entry(session_id)?;
        let cleared = entry.record.lock().await.clear_blocker(Instant::now());
        if cleared {
            info!(session_id, "Blocker cleared");
        }
        Ok(cleared)
    }

    /// Wait until the session stops being polled
    ///
    /// Returns on a terminal state, cancellation, or polling timeout; the
    /// status tells which.
    pub async fn wait_for_completion(&self, session_id: &str) -> Result<WorkerStatus> {
        let entry = self.entry(session_id)?;
        entry.done.cancelled().await;
        let record = entry.record.lock().await;
        Ok(record.status())
    }

    pub fn metrics(&self) -> ThroughputReport {
        self.inner.recorder.report()
    }

    /// Stop every poller and wait for the tasks to exit
    ///
    /// Remote sessions are left running.
    pub async fn shutdown(&self) {
        let pollers: Vec<(String, ActivePoller)> = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        info!(count = pollers.len(), "Shutting down pollers");

        for (_, poller) in &pollers {
            poller.cancel.cancel();
        }
        for (session_id, poller) in pollers {
            if let Err(e) = poller.task.await {
                warn!(session_id = %session_id, error = %e, "Poller task failed");
            }
        }
        self.update_active_gauge();
    }
}
