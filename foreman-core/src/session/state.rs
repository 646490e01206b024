//! Session lifecycle state machine
//!
//! A session moves `PLANNING -> WAITING_APPROVAL -> EXECUTING -> COMPLETED`,
//! with `FAILED` and `CANCELLED` reachable from any non-terminal state.
//! Transitions are driven by [`Trigger`]s derived from remote activity or
//! from explicit operator actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Local lifecycle state of a worker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Remote agent is producing a plan
    #[default]
    Planning,
    /// Plan generated, waiting for an operator decision
    WaitingApproval,
    /// Plan approved, remote agent is working
    Executing,
    /// Remote work finished successfully
    Completed,
    /// Remote work failed
    Failed,
    /// Cancelled by an operator
    Cancelled,
}

impl SessionState {
    /// Canonical upper-case name
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Planning => "PLANNING",
            SessionState::WaitingApproval => "WAITING_APPROVAL",
            SessionState::Executing => "EXECUTING",
            SessionState::Completed => "COMPLETED",
            SessionState::Failed => "FAILED",
            SessionState::Cancelled => "CANCELLED",
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Planning => "Generating a plan",
            SessionState::WaitingApproval => "Plan generated, waiting for approval",
            SessionState::Executing => "Executing the approved plan",
            SessionState::Completed => "Session completed",
            SessionState::Failed => "Session failed",
            SessionState::Cancelled => "Session cancelled",
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLANNING" => Ok(SessionState::Planning),
            "WAITING_APPROVAL" => Ok(SessionState::WaitingApproval),
            "EXECUTING" => Ok(SessionState::Executing),
            "COMPLETED" => Ok(SessionState::Completed),
            "FAILED" => Ok(SessionState::Failed),
            "CANCELLED" => Ok(SessionState::Cancelled),
            _ => Err(format!("Unknown session state: {}", s)),
        }
    }
}

/// Session state as reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteState {
    /// Any non-terminal remote state, kept verbatim
    Active(String),
    Completed,
    Failed,
    Cancelled,
}

impl RemoteState {
    /// Trigger this remote state implies for the local machine
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            RemoteState::Active(_) => None,
            RemoteState::Completed => Some(Trigger::RemoteCompleted),
            RemoteState::Failed => Some(Trigger::Failure {
                reason: "Remote session reported FAILED".to_string(),
            }),
            RemoteState::Cancelled => Some(Trigger::Cancel),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteState::Active(_))
    }
}

impl From<String> for RemoteState {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" | "SUCCEEDED" => RemoteState::Completed,
            "FAILED" => RemoteState::Failed,
            "CANCELLED" | "CANCELED" => RemoteState::Cancelled,
            _ => RemoteState::Active(value),
        }
    }
}

impl From<RemoteState> for String {
    fn from(state: RemoteState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteState::Active(raw) => write!(f, "{}", raw),
            RemoteState::Completed => write!(f, "COMPLETED"),
            RemoteState::Failed => write!(f, "FAILED"),
            RemoteState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Event that may move a session to another state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    /// Remote produced a plan
    PlanGenerated,
    /// Remote reported the plan as approved
    PlanApproved,
    /// Operator approved the plan
    Approve,
    /// Plan approved automatically by configuration
    AutoApprove,
    /// Operator rejected the plan
    Reject,
    /// Progress, code or message activity
    Progress,
    /// Remote reported completion
    RemoteCompleted,
    /// Fatal error activity or remote failure
    Failure { reason: String },
    /// Operator cancelled the session
    Cancel,
}

impl Trigger {
    /// Operator triggers fail loudly when they don't apply; activity
    /// triggers are silently ignored.
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            Trigger::Approve | Trigger::AutoApprove | Trigger::Reject | Trigger::Cancel
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trigger::PlanGenerated => "plan_generated",
            Trigger::PlanApproved => "plan_approved",
            Trigger::Approve => "approve",
            Trigger::AutoApprove => "auto_approve",
            Trigger::Reject => "reject",
            Trigger::Progress => "progress",
            Trigger::RemoteCompleted => "remote_completed",
            Trigger::Failure { .. } => "failure",
            Trigger::Cancel => "cancel",
        }
    }
}

/// A recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub trigger: Trigger,
    pub at: DateTime<Utc>,
}

/// Operator trigger fired in a state that doesn't accept it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No transition from {from} on {trigger}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub trigger: &'static str,
}

/// Transition table
///
/// Returns `None` when the trigger doesn't apply to `state`. A result equal
/// to `state` means the trigger is accepted without a state change.
pub fn next_state(state: SessionState, trigger: &Trigger) -> Option<SessionState> {
    use SessionState::*;

    if state.is_terminal() {
        return None;
    }

    match (state, trigger) {
        (Planning, Trigger::PlanGenerated) => Some(WaitingApproval),
        (WaitingApproval, Trigger::Approve | Trigger::AutoApprove | Trigger::PlanApproved) => {
            Some(Executing)
        }
        (WaitingApproval, Trigger::Reject) => Some(Planning),
        (_, Trigger::Progress) => Some(state),
        (_, Trigger::RemoteCompleted) => Some(Completed),
        (_, Trigger::Failure { .. }) => Some(Failed),
        (_, Trigger::Cancel) => Some(Cancelled),
        _ => None,
    }
}

/// State machine for one session with its transition history
#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    state: SessionState,
    history: Vec<Transition>,
}

impl SessionMachine {
    /// Create a machine in the initial `PLANNING` state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Check if the trigger would be accepted in the current state
    pub fn can_fire(&self, trigger: &Trigger) -> bool {
        next_state(self.state, trigger).is_some()
    }

    /// Apply a trigger
    ///
    /// Returns the recorded transition when the state changed, `None` when
    /// the trigger was accepted without change or ignored. Operator triggers
    /// that don't apply return an error.
    pub fn fire(&mut self, trigger: Trigger) -> Result<Option<Transition>, InvalidTransition> {
        let Some(to) = next_state(self.state, &trigger) else {
            if trigger.is_operator() {
                return Err(InvalidTransition {
                    from: self.state,
                    trigger: trigger.name(),
                });
            }
            tracing::debug!(state = %self.state, trigger = trigger.name(), "Ignoring trigger");
            return Ok(None);
        };

        if to == self.state {
            return Ok(None);
        }

        tracing::info!(
            from = %self.state,
            to = %to,
            trigger = trigger.name(),
            "Session state transition"
        );

        let transition = Transition {
            from: self.state,
            to,
            trigger,
            at: Utc::now(),
        };
        self.state = to;
        self.history.push(transition.clone());
        Ok(Some(transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> [SessionState; 6] {
        [
            SessionState::Planning,
            SessionState::WaitingApproval,
            SessionState::Executing,
            SessionState::Completed,
            SessionState::Failed,
            SessionState::Cancelled,
        ]
    }

    fn all_triggers() -> Vec<Trigger> {
        vec![
            Trigger::PlanGenerated,
            Trigger::PlanApproved,
            Trigger::Approve,
            Trigger::AutoApprove,
            Trigger::Reject,
            Trigger::Progress,
            Trigger::RemoteCompleted,
            Trigger::Failure {
                reason: "x".into(),
            },
            Trigger::Cancel,
        ]
    }

    #[test]
    fn test_initial_state() {
        let machine = SessionMachine::new();
        assert_eq!(machine.state(), SessionState::Planning);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_happy_path() {
        let mut machine = SessionMachine::new();
        machine.fire(Trigger::PlanGenerated).unwrap();
        assert_eq!(machine.state(), SessionState::WaitingApproval);
        machine.fire(Trigger::Approve).unwrap();
        assert_eq!(machine.state(), SessionState::Executing);
        assert!(machine.fire(Trigger::Progress).unwrap().is_none());
        assert_eq!(machine.state(), SessionState::Executing);
        machine.fire(Trigger::RemoteCompleted).unwrap();
        assert_eq!(machine.state(), SessionState::Completed);
        assert_eq!(machine.history().len(), 3);
    }

    #[test]
    fn test_reject_returns_to_planning() {
        let mut machine = SessionMachine::new();
        machine.fire(Trigger::PlanGenerated).unwrap();
        let transition = machine.fire(Trigger::Reject).unwrap().unwrap();
        assert_eq!(transition.from, SessionState::WaitingApproval);
        assert_eq!(transition.to, SessionState::Planning);
    }

    #[test]
    fn test_never_executing_from_planning() {
        for trigger in all_triggers() {
            assert_ne!(
                next_state(SessionState::Planning, &trigger),
                Some(SessionState::Executing),
                "trigger {:?} skipped the approval gate",
                trigger
            );
        }
    }

    #[test]
    fn test_terminal_states_absorb() {
        for state in all_states().into_iter().filter(|s| s.is_terminal()) {
            for trigger in all_triggers() {
                assert_eq!(next_state(state, &trigger), None);
            }
        }
    }

    #[test]
    fn test_failure_and_cancel_from_any_non_terminal() {
        for state in all_states().into_iter().filter(|s| !s.is_terminal()) {
            assert_eq!(
                next_state(
                    state,
                    &Trigger::Failure {
                        reason: "boom".into()
                    }
                ),
                Some(SessionState::Failed)
            );
            assert_eq!(
                next_state(state, &Trigger::Cancel),
                Some(SessionState::Cancelled)
            );
        }
    }

    #[test]
    fn test_operator_trigger_in_wrong_state_errors() {
        let mut machine = SessionMachine::new();
        let err = machine.fire(Trigger::Approve).unwrap_err();
        assert_eq!(err.from, SessionState::Planning);
        assert_eq!(err.trigger, "approve");
        assert_eq!(machine.state(), SessionState::Planning);
    }

    #[test]
    fn test_activity_trigger_in_wrong_state_ignored() {
        let mut machine = SessionMachine::new();
        machine.fire(Trigger::PlanGenerated).unwrap();
        machine.fire(Trigger::Approve).unwrap();
        // A late plan activity must not drag the session backwards
        assert!(machine.fire(Trigger::PlanGenerated).unwrap().is_none());
        assert!(machine.fire(Trigger::PlanApproved).unwrap().is_none());
        assert_eq!(machine.state(), SessionState::Executing);
    }

    #[test]
    fn test_cancel_after_terminal_errors() {
        let mut machine = SessionMachine::new();
        machine.fire(Trigger::Cancel).unwrap();
        assert!(machine.fire(Trigger::Cancel).is_err());
        assert_eq!(machine.state(), SessionState::Cancelled);
    }

    #[test]
    fn test_auto_approve_recorded_as_distinct_trigger() {
        let mut machine = SessionMachine::new();
        machine.fire(Trigger::PlanGenerated).unwrap();
        machine.fire(Trigger::AutoApprove).unwrap();
        let last = machine.history().last().unwrap();
        assert_eq!(last.trigger, Trigger::AutoApprove);
        assert_eq!(last.to, SessionState::Executing);
    }

    #[test]
    fn test_remote_state_parsing() {
        assert_eq!(
            RemoteState::from("COMPLETED".to_string()),
            RemoteState::Completed
        );
        assert_eq!(
            RemoteState::from("canceled".to_string()),
            RemoteState::Cancelled
        );
        assert_eq!(
            RemoteState::from("IN_PROGRESS".to_string()),
            RemoteState::Active("IN_PROGRESS".to_string())
        );
        assert!(RemoteState::Failed.is_terminal());
        assert_eq!(RemoteState::Active("QUEUED".into()).trigger(), None);
    }

    #[test]
    fn test_session_state_serde() {
        let json = serde_json::to_string(&SessionState::WaitingApproval).unwrap();
        assert_eq!(json, "\"WAITING_APPROVAL\"");
        let parsed: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SessionState::WaitingApproval);
        assert_eq!(
            "executing".parse::<SessionState>().unwrap(),
            SessionState::Executing
        );
    }
}
