//! Per-session mutable record owned by the manager

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::activity::{Activity, ActivityKind};
use crate::notify::CompletionSummary;
use super::ledger::ActivityLedger;
use super::state::{InvalidTransition, RemoteState, SessionMachine, SessionState, Transition, Trigger};

/// Reason a session currently needs attention
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blocker {
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// Parameters for a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub prompt: String,
    pub source: String,
    pub title: String,
    pub branch: String,
}

/// Local view of one remote session
#[derive(Debug)]
pub struct SessionRecord {
    id: String,
    prompt: String,
    source: String,
    title: String,
    branch: String,
    created_at: DateTime<Utc>,
    started: Instant,
    last_activity_at: Instant,
    machine: SessionMachine,
    ledger: ActivityLedger,
    blocker: Option<Blocker>,
    remote_state: Option<RemoteState>,
    pending_plan_id: Option<String>,
    error_message: Option<String>,
    poll_cycles: u64,
    completion_reported: bool,
}

/// Point-in-time status of a session
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub session_id: String,
    pub title: String,
    pub prompt: String,
    pub source: String,
    pub branch: String,
    pub state: SessionState,
    pub blocked: bool,
    pub blocker_reason: Option<String>,
    pub remote_state: Option<String>,
    pub pending_plan_id: Option<String>,
    pub error_message: Option<String>,
    pub activity_count: usize,
    pub poll_cycles: u64,
    pub created_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub age: Duration,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, params: NewSession) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            prompt: params.prompt,
            source: params.source,
            title: params.title,
            branch: params.branch,
            created_at: Utc::now(),
            started: now,
            last_activity_at: now,
            machine: SessionMachine::new(),
            ledger: ActivityLedger::new(),
            blocker: None,
            remote_state: None,
            pending_plan_id: None,
            error_message: None,
            poll_cycles: 0,
            completion_reported: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn history(&self) -> &[Transition] {
        self.machine.history()
    }

    pub fn ledger(&self) -> &ActivityLedger {
        &self.ledger
    }

    pub fn blocker(&self) -> Option<&Blocker> {
        self.blocker.as_ref()
    }

    pub fn poll_cycles(&self) -> u64 {
        self.poll_cycles
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since the last new activity (or creation)
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }

    pub(crate) fn count_poll_cycle(&mut self) {
        self.poll_cycles += 1;
    }

    /// Completion summary for a terminal session, handed out only once
    ///
    /// Both the poller and an operator cancel can observe the terminal
    /// state; whichever takes the summary first delivers the notification.
    pub(crate) fn take_completion(&mut self) -> Option<CompletionSummary> {
        if self.completion_reported || !self.state().is_terminal() {
            return None;
        }
        self.completion_reported = true;
        Some(CompletionSummary {
            session_id: self.id.clone(),
            final_state: self.state(),
            duration: self.age(),
            total_activities: self.ledger.len(),
            poll_cycles: self.poll_cycles,
        })
    }

    /// Apply an operator or internal trigger
    pub fn fire(&mut self, trigger: Trigger) -> Result<Option<Transition>, InvalidTransition> {
        let approving = matches!(trigger, Trigger::Approve | Trigger::AutoApprove);
        let rejecting = matches!(trigger, Trigger::Reject);
        let transition = self.machine.fire(trigger)?;
        if approving || rejecting {
            self.pending_plan_id = None;
            self.blocker = None;
        }
        Ok(transition)
    }

    /// Append a polled batch and advance the state machine
    ///
    /// Returns the activities that were new. Any new activity clears the
    /// blocked flag.
    pub fn apply_activities(&mut self, batch: Vec<Activity>, now: Instant) -> Vec<Activity> {
        let fresh = self.ledger.append(batch);
        if fresh.is_empty() {
            return fresh;
        }

        self.last_activity_at = now;
        if self.blocker.take().is_some() {
            info!(session_id = %self.id, "Session unblocked by new activity");
        }

        for activity in &fresh {
            match &activity.kind {
                ActivityKind::PlanGenerated { plan_id, .. } => {
                    self.pending_plan_id = plan_id.clone().or_else(|| Some(activity.id.clone()));
                }
                ActivityKind::PlanApproved { .. } => self.pending_plan_id = None,
                ActivityKind::Error { message, .. } => self.error_message = Some(message.clone()),
                ActivityKind::SessionFailed { reason: Some(reason) } => {
                    self.error_message = Some(reason.clone())
                }
                _ => {}
            }

            if self.machine.state().is_terminal() {
                continue;
            }
            if let Some(trigger) = activity.kind.trigger() {
                // activity triggers never error; operator ones are not derived here
                if let Err(e) = self.machine.fire(trigger) {
                    warn!(session_id = %self.id, error = %e, "Activity trigger rejected");
                }
            }
        }

        fresh
    }

    /// Reconcile with the state reported by the remote service
    pub fn apply_remote_state(&mut self, remote: RemoteState) -> Option<Transition> {
        let trigger = remote.trigger();
        self.remote_state = Some(remote);
        let trigger = trigger?;

        if self.machine.state().is_terminal() {
            return None;
        }
        if let Trigger::Failure { reason } = &trigger {
            self.error_message.get_or_insert_with(|| reason.clone());
        }
        self.machine.fire(trigger).ok().flatten()
    }

    /// Flag the session as blocked if it has been silent too long
    ///
    /// Returns true when the flag was newly set.
    pub fn check_stuck(&mut self, now: Instant, stuck_timeout: Duration) -> bool {
        if self.blocker.is_some() || self.machine.state().is_terminal() {
            return false;
        }
        let idle = self.idle_for(now);
        if idle <= stuck_timeout {
            return false;
        }
        let reason = format!(
            "No activity for {} (potentially stuck)",
            humantime_serde::re::humantime::format_duration(Duration::from_secs(idle.as_secs()))
        );
        warn!(session_id = %self.id, %reason, "Session blocked");
        self.mark_blocked(reason);
        true
    }

    pub fn mark_blocked(&mut self, reason: impl Into<String>) {
        self.blocker = Some(Blocker {
            reason: reason.into(),
            since: Utc::now(),
        });
    }

    /// Clear the blocked flag after operator intervention
    pub fn clear_blocker(&mut self, now: Instant) -> bool {
        self.last_activity_at = now;
        self.blocker.take().is_some()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            session_id: self.id.clone(),
            title: self.title.clone(),
            prompt: self.prompt.clone(),
            source: self.source.clone(),
            branch: self.branch.clone(),
            state: self.state(),
            blocked: self.blocker.is_some(),
            blocker_reason: self.blocker.as_ref().map(|b| b.reason.clone()),
            remote_state: self.remote_state.as_ref().map(|s| s.to_string()),
            pending_plan_id: self.pending_plan_id.clone(),
            error_message: self.error_message.clone(),
            activity_count: self.ledger.len(),
            poll_cycles: self.poll_cycles,
            created_at: self.created_at,
            age: self.age(),
        }
    }
}
