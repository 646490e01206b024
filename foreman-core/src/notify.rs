//! Notification dispatch for new session activity

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::session::{Activity, SessionState};

/// Error returned by a handler; logged and otherwise ignored
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Final summary delivered when a session reaches a terminal state
#[derive(Debug, Clone, Serialize)]
pub struct CompletionSummary {
    pub session_id: String,
    pub final_state: SessionState,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub total_activities: usize,
    pub poll_cycles: u64,
}

/// Receiver of session activity notifications
///
/// Handlers run synchronously on the polling task, so they should return
/// quickly.
pub trait NotificationHandler: Send + Sync {
    /// Called once per new activity, after it is in the ledger
    fn on_activity(&self, session_id: &str, activity: &Activity) -> Result<(), HandlerError>;

    /// Called once when the session reaches a terminal state
    fn on_completion(&self, _summary: &CompletionSummary) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<F> NotificationHandler for F
where
    F: Fn(&str, &Activity) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_activity(&self, session_id: &str, activity: &Activity) -> Result<(), HandlerError> {
        self(session_id, activity)
    }
}

/// Opaque registration handle returned by [`NotificationDispatcher::add_handler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered set of handlers
#[derive(Default)]
pub struct NotificationDispatcher {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn NotificationHandler>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("handlers", &self.len())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it runs after all previously registered ones
    pub fn add_handler(&self, handler: impl NotificationHandler + 'static) -> HandlerId {
        self.add_shared(Arc::new(handler))
    }

    pub fn add_shared(&self, handler: Arc<dyn NotificationHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push((id, handler));
        info!(total = handlers.len(), "Added notification handler");
        id
    }

    /// Unregister a handler, returning whether it was present
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        let removed = handlers.len() != before;
        if removed {
            info!(total = handlers.len(), "Removed notification handler");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn NotificationHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }

    /// Deliver one activity to every handler in registration order
    pub fn notify(&self, session_id: &str, activity: &Activity) {
        debug!(session_id, activity = %activity.summary(), "Dispatching activity");
        for handler in self.snapshot() {
            if let Err(e) = handler.on_activity(session_id, activity) {
                warn!(session_id, error = %e, "Notification handler failed");
            }
        }
    }

    /// Deliver a terminal summary to every handler
    pub fn notify_completion(&self, summary: &CompletionSummary) {
        info!(
            session_id = %summary.session_id,
            final_state = %summary.final_state,
            "Notifying completion"
        );
        for handler in self.snapshot() {
            if let Err(e) = handler.on_completion(summary) {
                warn!(session_id = %summary.session_id, error = %e, "Completion handler failed");
            }
        }
    }
}
