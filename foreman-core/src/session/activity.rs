//! Activity model and wire decoding
//!
//! The remote service reports each event as a JSON object whose payload key
//! identifies the kind (`planGenerated`, `progressUpdated`, ...). Some
//! deployments instead send a flat `type` field. Both shapes decode into
//! [`ActivityKind`]; anything unrecognised is kept as [`ActivityKind::Unknown`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::Trigger;

/// Typed payload of an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    PlanGenerated {
        plan_id: Option<String>,
        steps: usize,
    },
    PlanApproved {
        plan_id: Option<String>,
    },
    PlanRejected {
        feedback: Option<String>,
    },
    #[serde(rename = "PROGRESS_UPDATE")]
    Progress {
        title: Option<String>,
        description: Option<String>,
    },
    CodeGenerated {
        summary: Option<String>,
    },
    Message {
        originator: String,
        text: String,
    },
    Error {
        message: String,
        fatal: bool,
    },
    SessionCompleted,
    SessionFailed {
        reason: Option<String>,
    },
    Unknown {
        raw: Value,
    },
}

impl ActivityKind {
    /// Upper-case label used in logs and summaries
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::PlanGenerated { .. } => "PLAN_GENERATED",
            ActivityKind::PlanApproved { .. } => "PLAN_APPROVED",
            ActivityKind::PlanRejected { .. } => "PLAN_REJECTED",
            ActivityKind::Progress { .. } => "PROGRESS_UPDATE",
            ActivityKind::CodeGenerated { .. } => "CODE_GENERATED",
            ActivityKind::Message { .. } => "MESSAGE",
            ActivityKind::Error { .. } => "ERROR",
            ActivityKind::SessionCompleted => "SESSION_COMPLETED",
            ActivityKind::SessionFailed { .. } => "SESSION_FAILED",
            ActivityKind::Unknown { .. } => "UNKNOWN",
        }
    }

    /// State machine trigger implied by this activity
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            ActivityKind::PlanGenerated { .. } => Some(Trigger::PlanGenerated),
            ActivityKind::PlanApproved { .. } => Some(Trigger::PlanApproved),
            ActivityKind::Progress { .. }
            | ActivityKind::CodeGenerated { .. }
            | ActivityKind::Message { .. }
            | ActivityKind::Error { fatal: false, .. } => Some(Trigger::Progress),
            ActivityKind::Error {
                message,
                fatal: true,
            } => Some(Trigger::Failure {
                reason: message.clone(),
            }),
            ActivityKind::SessionCompleted => Some(Trigger::RemoteCompleted),
            ActivityKind::SessionFailed { reason } => Some(Trigger::Failure {
                reason: reason
                    .clone()
                    .unwrap_or_else(|| "Session failed".to_string()),
            }),
            ActivityKind::PlanRejected { .. } | ActivityKind::Unknown { .. } => None,
        }
    }
}

/// One event in a session's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Remote identity, used for duplicate detection
    pub id: String,
    /// Position within the session, monotonically increasing
    pub sequence: u64,
    pub create_time: Option<DateTime<Utc>>,
    pub originator: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub kind: ActivityKind,
}

impl Activity {
    /// Build an activity directly from a kind
    pub fn new(id: impl Into<String>, sequence: u64, kind: ActivityKind) -> Self {
        let (title, message) = summary_text(&kind);
        Self {
            id: id.into(),
            sequence,
            create_time: None,
            originator: None,
            title,
            message,
            kind,
        }
    }

    /// Decode an activity from its wire JSON
    ///
    /// `position` is the zero-based index in the ordered listing and is used
    /// as the sequence when the payload carries none.
    pub fn from_wire(value: &Value, position: u64) -> Self {
        let id = str_field(value, "id")
            .or_else(|| {
                str_field(value, "name").and_then(|name| name.rsplit('/').next().map(String::from))
            })
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("position-{}", position));

        let sequence = value
            .get("sequence")
            .and_then(Value::as_u64)
            .unwrap_or(position);

        let create_time = str_field(value, "createTime")
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc));

        let kind = decode_kind(value);
        let (title, summary) = summary_text(&kind);
        let message = str_field(value, "message").or(summary);

        Self {
            id,
            sequence,
            create_time,
            originator: str_field(value, "originator"),
            title: str_field(value, "title").or(title),
            message,
            kind,
        }
    }

    /// One-line description for logs and CLI output
    pub fn summary(&self) -> String {
        let text = self
            .message
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("");
        if text.is_empty() {
            self.kind.label().to_string()
        } else {
            format!("{}: {}", self.kind.label(), truncate_text(text, 100))
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

fn decode_kind(value: &Value) -> ActivityKind {
    if let Some(plan) = value.get("planGenerated") {
        let plan = plan.get("plan").unwrap_or(plan);
        return ActivityKind::PlanGenerated {
            plan_id: str_field(plan, "id"),
            steps: plan
                .get("steps")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0),
        };
    }
    if let Some(approved) = value.get("planApproved") {
        return ActivityKind::PlanApproved {
            plan_id: str_field(approved, "planId"),
        };
    }
    if let Some(rejected) = value.get("planRejected") {
        return ActivityKind::PlanRejected {
            feedback: str_field(rejected, "feedback"),
        };
    }
    if value.get("sessionCompleted").is_some() {
        return ActivityKind::SessionCompleted;
    }
    if let Some(failed) = value.get("sessionFailed") {
        return ActivityKind::SessionFailed {
            reason: str_field(failed, "reason"),
        };
    }
    if let Some(error) = value.get("error") {
        return decode_error(error);
    }
    if let Some(code) = value.get("codeGenerated") {
        return ActivityKind::CodeGenerated {
            summary: str_field(code, "summary"),
        };
    }
    if let Some(progress) = value.get("progressUpdated") {
        return ActivityKind::Progress {
            title: str_field(progress, "title"),
            description: str_field(progress, "description"),
        };
    }
    for (key, originator) in [
        ("userMessaged", "user"),
        ("userMessage", "user"),
        ("agentMessaged", "agent"),
        ("agentMessage", "agent"),
    ] {
        if let Some(msg) = value.get(key) {
            let text = str_field(msg, "message")
                .or_else(|| str_field(msg, "userMessage"))
                .or_else(|| str_field(msg, "agentMessage"))
                .unwrap_or_default();
            return ActivityKind::Message {
                originator: originator.to_string(),
                text,
            };
        }
    }
    if has_change_set(value) {
        return ActivityKind::CodeGenerated { summary: None };
    }
    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        return decode_flat(kind, value);
    }

    ActivityKind::Unknown { raw: value.clone() }
}

fn decode_error(error: &Value) -> ActivityKind {
    let message = str_field(error, "message").unwrap_or_else(|| "Unknown error".to_string());
    let fatal = error.get("fatal").and_then(Value::as_bool).unwrap_or(false)
        || str_field(error, "severity").is_some_and(|s| s.eq_ignore_ascii_case("fatal"));
    ActivityKind::Error { message, fatal }
}

fn has_change_set(value: &Value) -> bool {
    value
        .get("artifacts")
        .and_then(Value::as_array)
        .is_some_and(|artifacts| artifacts.iter().any(|a| a.get("changeSet").is_some()))
}

/// Decode the flat `{"type": "...", "message": "..."}` shape
fn decode_flat(kind: &str, value: &Value) -> ActivityKind {
    let message = str_field(value, "message");
    match kind.to_ascii_uppercase().as_str() {
        "PLAN_GENERATED" => ActivityKind::PlanGenerated {
            plan_id: str_field(value, "planId"),
            steps: 0,
        },
        "PLAN_APPROVED" => ActivityKind::PlanApproved {
            plan_id: str_field(value, "planId"),
        },
        "PLAN_REJECTED" => ActivityKind::PlanRejected { feedback: message },
        "PROGRESS_UPDATE" | "PROGRESS_UPDATED" => ActivityKind::Progress {
            title: str_field(value, "title"),
            description: message,
        },
        "CODE_GENERATED" => ActivityKind::CodeGenerated { summary: message },
        "MESSAGE" | "MESSAGE_SENT" => ActivityKind::Message {
            originator: str_field(value, "originator").unwrap_or_else(|| "agent".to_string()),
            text: message.unwrap_or_default(),
        },
        "ERROR" => {
            let fatal = value.get("fatal").and_then(Value::as_bool).unwrap_or(false)
                || str_field(value, "severity").is_some_and(|s| s.eq_ignore_ascii_case("fatal"));
            ActivityKind::Error {
                message: message.unwrap_or_else(|| "Unknown error".to_string()),
                fatal,
            }
        }
        "SESSION_COMPLETED" | "COMPLETION_NOTIFICATION" => ActivityKind::SessionCompleted,
        "SESSION_FAILED" => ActivityKind::SessionFailed { reason: message },
        _ => ActivityKind::Unknown { raw: value.clone() },
    }
}

fn summary_text(kind: &ActivityKind) -> (Option<String>, Option<String>) {
    match kind {
        ActivityKind::PlanGenerated { steps, .. } => (
            Some("Plan generated".to_string()),
            Some(format!("{} step(s)", steps)),
        ),
        ActivityKind::PlanApproved { .. } => (Some("Plan approved".to_string()), None),
        ActivityKind::PlanRejected { feedback } => {
            (Some("Plan rejected".to_string()), feedback.clone())
        }
        ActivityKind::Progress { title, description } => (title.clone(), description.clone()),
        ActivityKind::CodeGenerated { summary } => {
            (Some("Code generated".to_string()), summary.clone())
        }
        ActivityKind::Message { originator, text } => {
            let title = if originator == "user" {
                "User Message"
            } else {
                "Agent Message"
            };
            (Some(title.to_string()), Some(text.clone()))
        }
        ActivityKind::Error { message, .. } => (Some("Error".to_string()), Some(message.clone())),
        ActivityKind::SessionCompleted => (Some("Session completed".to_string()), None),
        ActivityKind::SessionFailed { reason } => {
            (Some("Session failed".to_string()), reason.clone())
        }
        ActivityKind::Unknown { .. } => (None, None),
    }
}

/// Truncate text to `max_length` characters with an ellipsis suffix
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_length.saturating_sub(3)).collect();
    format!("{}...", kept)
}
