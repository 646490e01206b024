//! Per-session polling task

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{activities_resource, SessionEntry, WorkerManager};
use crate::client::RemoteSession;
use crate::error::{Error, Result};
use crate::session::{Activity, SessionState, Trigger};

/// Reason recorded when a session outlives the maximum polling duration
pub const POLLING_TIMEOUT_REASON: &str = "polling timeout";

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Continue,
    Stop,
}

pub(super) struct Poller {
    manager: WorkerManager,
    session_id: String,
    entry: SessionEntry,
    cancel: CancellationToken,
}

impl Poller {
    pub(super) fn new(
        manager: WorkerManager,
        session_id: String,
        entry: SessionEntry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            session_id,
            entry,
            cancel,
        }
    }

    /// Poll until the session is terminal, cancelled, or the polling
    /// budget runs out
    pub(super) async fn run(self) {
        let config = self.manager.polling().clone();
        let started = Instant::now();
        // tokio panics on a zero period
        let period = config.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            session_id = %self.session_id,
            interval = ?config.interval,
            "Polling started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(session_id = %self.session_id, "Polling cancelled");
                    break;
                }
                _ = interval.tick() => {}
            }

            if started.elapsed() >= config.max_duration {
                warn!(
                    session_id = %self.session_id,
                    max_duration = ?config.max_duration,
                    "Polling duration exceeded, leaving session blocked"
                );
                self.entry.record.lock().await.mark_blocked(POLLING_TIMEOUT_REASON);
                break;
            }

            if self.poll_once(config.stuck_timeout, config.auto_approve).await == Cycle::Stop {
                break;
            }
        }

        self.manager.finish_polling(&self.session_id, &self.entry);
    }

    async fn poll_once(&self, stuck_timeout: Duration, auto_approve: bool) -> Cycle {
        let resource = activities_resource(&self.session_id);
        if !self.manager.limiter().can_call(&resource) {
            warn!(session_id = %self.session_id, %resource, "Rate limited, skipping poll cycle");
            return Cycle::Continue;
        }
        self.manager.recorder().record_poll_cycle();
        debug!(session_id = %self.session_id, "Poll cycle");

        let fetched = self.fetch().await;
        if self.cancel.is_cancelled() {
            return Cycle::Stop;
        }

        let (fresh, state) = {
            let mut record = self.entry.record.lock().await;
            // an operator cancel may have taken the lock first
            if self.cancel.is_cancelled() {
                return Cycle::Stop;
            }
            record.count_poll_cycle();

            let (remote, activities) = match fetched {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        "Poll failed, retrying next interval"
                    );
                    return Cycle::Continue;
                }
            };

            let now = Instant::now();
            let fresh = record.apply_activities(activities, now);
            if let Some(remote_state) = remote.state {
                record.apply_remote_state(remote_state);
            }
            record.check_stuck(now, stuck_timeout);
            debug!(
                session_id = %self.session_id,
                new = fresh.len(),
                cursor = ?record.ledger().cursor(),
                "Activities applied"
            );
            (fresh, record.state())
        };

        self.manager.recorder().record_activity_processed(fresh.len());
        for activity in &fresh {
            if self.cancel.is_cancelled() {
                break;
            }
            self.manager.dispatcher().notify(&self.session_id, activity);
        }

        if state == SessionState::WaitingApproval && auto_approve && !self.cancel.is_cancelled() {
            self.auto_approve().await;
        }

        let (state, summary) = {
            let mut record = self.entry.record.lock().await;
            (record.state(), record.take_completion())
        };
        if let Some(summary) = summary {
            info!(
                session_id = %self.session_id,
                final_state = %summary.final_state,
                "Session reached terminal state"
            );
            self.manager.dispatcher().notify_completion(&summary);
        }
        if state.is_terminal() || self.cancel.is_cancelled() {
            return Cycle::Stop;
        }
        Cycle::Continue
    }

    async fn fetch(&self) -> Result<(RemoteSession, Vec<Activity>)> {
        let client = self.manager.client();
        let remote = client.get_session(&self.session_id).await?;
        let activities = client.list_all_activities(&self.session_id).await?;
        Ok((remote, activities))
    }

    async fn auto_approve(&self) {
        match self
            .manager
            .answer_plan(&self.session_id, Trigger::AutoApprove, "")
            .await
        {
            Ok(_) => info!(session_id = %self.session_id, "Plan auto-approved"),
            // operator got there first
            Err(Error::InvalidState { .. }) => {}
            Err(e) => warn!(
                session_id = %self.session_id,
                error = %e,
                "Auto-approval failed, retrying next cycle"
            ),
        }
    }
}
