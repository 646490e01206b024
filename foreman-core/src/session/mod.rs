//! Session model: lifecycle state machine, activities and the per-session ledger

mod activity;
mod ledger;
mod record;
mod state;

pub use activity::{truncate_text, Activity, ActivityKind};
pub use ledger::ActivityLedger;
pub use record::{Blocker, NewSession, SessionRecord, WorkerStatus};
pub use state::{
    next_state, InvalidTransition, RemoteState, SessionMachine, SessionState, Transition, Trigger,
};
