//! Throughput and cost accounting for remote calls and polling

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

/// Raw counters, monotonic until reset
#[derive(Debug, Clone, Default)]
struct ThroughputMetrics {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_duration: Duration,
    bytes_sent: u64,
    bytes_received: u64,
    activities_processed: u64,
    polling_cycles: u64,
    active_sessions: usize,
}

/// Snapshot returned by [`ThroughputRecorder::report`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputReport {
    pub generated_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage in `0.0..=100.0`
    pub success_rate: f64,
    #[serde(with = "humantime_serde")]
    pub average_duration: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub activities_processed: u64,
    pub polling_cycles: u64,
    pub active_sessions: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

/// Process-wide recorder shared by the client and the pollers
#[derive(Debug)]
pub struct ThroughputRecorder {
    metrics: Mutex<ThroughputMetrics>,
    started: Mutex<Instant>,
}

impl Default for ThroughputRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputRecorder {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(ThroughputMetrics::default()),
            started: Mutex::new(Instant::now()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ThroughputMetrics) -> R) -> R {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut metrics)
    }

    /// Record one transport call
    pub fn record_request(
        &self,
        duration: Duration,
        success: bool,
        bytes_sent: usize,
        bytes_received: usize,
    ) {
        self.with(|m| {
            m.total_requests += 1;
            if success {
                m.successful_requests += 1;
            } else {
                m.failed_requests += 1;
            }
            m.total_duration += duration;
            m.bytes_sent += bytes_sent as u64;
            m.bytes_received += bytes_received as u64;
        });
    }

    pub fn record_activity_processed(&self, count: usize) {
        self.with(|m| m.activities_processed += count as u64);
    }

    pub fn record_poll_cycle(&self) {
        self.with(|m| m.polling_cycles += 1);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.with(|m| m.active_sessions = count);
    }

    /// Zero all counters and restart the elapsed clock
    ///
    /// The active session gauge is kept since it reflects live state.
    pub fn reset(&self) {
        self.with(|m| {
            let active = m.active_sessions;
            *m = ThroughputMetrics {
                active_sessions: active,
                ..ThroughputMetrics::default()
            };
        });
        *self.started.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        info!("Throughput metrics reset");
    }

    pub fn report(&self) -> ThroughputReport {
        let elapsed = self
            .started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed();
        self.with(|m| {
            let total = m.total_requests.max(1);
            ThroughputReport {
                generated_at: Utc::now(),
                total_requests: m.total_requests,
                successful_requests: m.successful_requests,
                failed_requests: m.failed_requests,
                success_rate: m.successful_requests as f64 / total as f64 * 100.0,
                average_duration: average(m.total_duration, m.total_requests),
                bytes_sent: m.bytes_sent,
                bytes_received: m.bytes_received,
                activities_processed: m.activities_processed,
                polling_cycles: m.polling_cycles,
                active_sessions: m.active_sessions,
                elapsed,
            }
        })
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Throughput Report ===")?;
        writeln!(f, "Generated: {}", self.generated_at.to_rfc3339())?;
        writeln!(f)?;
        writeln!(f, "Request Statistics:")?;
        writeln!(f, "- Total Requests: {}", self.total_requests)?;
        writeln!(f, "- Successful: {}", self.successful_requests)?;
        writeln!(f, "- Failed: {}", self.failed_requests)?;
        writeln!(f, "- Success Rate: {:.2}%", self.success_rate)?;
        writeln!(
            f,
            "- Average Response Time: {:.3}s",
            self.average_duration.as_secs_f64()
        )?;
        writeln!(f)?;
        writeln!(f, "Data Transfer:")?;
        writeln!(f, "- Bytes Sent: {}", self.bytes_sent)?;
        writeln!(f, "- Bytes Received: {}", self.bytes_received)?;
        writeln!(f)?;
        writeln!(f, "Session Activity:")?;
        writeln!(f, "- Activities Processed: {}", self.activities_processed)?;
        writeln!(f, "- Polling Cycles: {}", self.polling_cycles)?;
        writeln!(f, "- Active Sessions: {}", self.active_sessions)?;
        writeln!(f)?;
        write!(f, "Elapsed: {:.1}s", self.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report() {
        let report = ThroughputRecorder::new().report();
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.average_duration, Duration::ZERO);
    }

    #[test]
    fn test_average_handles_large_counts() {
        assert_eq!(average(Duration::from_secs(3), 0), Duration::ZERO);
        assert_eq!(
            average(Duration::from_secs(3), 2),
            Duration::from_millis(1500)
        );
        // a u32 cast of this count would be zero
        assert_eq!(average(Duration::from_secs(8), 1 << 32), Duration::from_nanos(1));
    }

    #[test]
    fn test_request_accounting() {
        let recorder = ThroughputRecorder::new();
        recorder.record_request(Duration::from_millis(100), true, 10, 200);
        recorder.record_request(Duration::from_millis(300), false, 5, 0);
        recorder.record_request(Duration::from_millis(200), true, 0, 50);

        let report = recorder.report();
        assert_eq!(report.total_requests, 3);
        assert_eq!(report.successful_requests, 2);
        assert_eq!(report.failed_requests, 1);
        assert!((report.success_rate - 66.666).abs() < 0.01);
        assert_eq!(report.average_duration, Duration::from_millis(200));
        assert_eq!(report.bytes_sent, 15);
        assert_eq!(report.bytes_received, 250);
    }

    #[test]
    fn test_activity_and_poll_counters() {
        let recorder = ThroughputRecorder::new();
        recorder.record_activity_processed(3);
        recorder.record_activity_processed(2);
        recorder.record_poll_cycle();
        recorder.set_active_sessions(4);

        let report = recorder.report();
        assert_eq!(report.activities_processed, 5);
        assert_eq!(report.polling_cycles, 1);
        assert_eq!(report.active_sessions, 4);
    }

    #[test]
    fn test_reset_keeps_active_gauge() {
        let recorder = ThroughputRecorder::new();
        recorder.record_request(Duration::from_millis(10), true, 1, 1);
        recorder.record_poll_cycle();
        recorder.set_active_sessions(2);
        recorder.reset();

        let report = recorder.report();
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.polling_cycles, 0);
        assert_eq!(report.active_sessions, 2);
    }

    #[test]
    fn test_display_report() {
        let recorder = ThroughputRecorder::new();
        recorder.record_request(Duration::from_millis(10), true, 1, 1);
        let text = recorder.report().to_string();
        assert!(text.contains("Total Requests: 1"));
        assert!(text.contains("Success Rate: 100.00%"));
    }
}
