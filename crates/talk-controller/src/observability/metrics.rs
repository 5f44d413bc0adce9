//! Metrics definitions for the talk controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `talk_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `outcome`: match outcomes (matched, no_teacher, insufficient_points, ...)
//! - `status`: completed, aborted
//! - `reason`: session end reasons (7 values)
//! - `kind`: ledger entry kinds (5 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Active talk time: sessions run up to the configured duration (5 min default)
        .set_buckets_for_metric(
            Matcher::Full("talk_session_active_seconds".to_string()),
            &[
                10.0, 30.0, 60.0, 120.0, 180.0, 240.0, 300.0, 360.0, 600.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Matching
// ============================================================================

/// Record the outcome of a `find_match` call.
///
/// Metric: `talk_match_attempts_total`
/// Labels: `outcome`
pub fn record_match_attempt(outcome: &'static str) {
    counter!("talk_match_attempts_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Sessions
// ============================================================================

/// Record a session leaving the open set.
///
/// Metric: `talk_sessions_ended_total`
/// Labels: `status` (completed, aborted), `reason`
pub fn record_session_ended(status: &'static str, reason: &'static str) {
    counter!("talk_sessions_ended_total", "status" => status, "reason" => reason).increment(1);
}

/// Record how long a session was active before it ended.
///
/// Metric: `talk_session_active_seconds`
pub fn record_session_active_duration(duration: Duration) {
    histogram!("talk_session_active_seconds").record(duration.as_secs_f64());
}

/// Set the number of pending or active sessions.
///
/// Metric: `talk_sessions_open`
pub fn set_sessions_open(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("talk_sessions_open").set(count as f64);
}

/// Set the number of users currently `available`.
///
/// Metric: `talk_users_available`
pub fn set_users_available(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("talk_users_available").set(count as f64);
}

// ============================================================================
// Ledger
// ============================================================================

/// Record an appended ledger entry.
///
/// Metric: `talk_ledger_entries_total`
/// Labels: `kind`
pub fn record_ledger_entry(kind: &'static str) {
    counter!("talk_ledger_entries_total", "kind" => kind).increment(1);
}

// ============================================================================
// Actor
// ============================================================================

/// Set the coordinator mailbox depth.
///
/// Metric: `talk_coordinator_mailbox_depth`
///
/// High values indicate the coordinator is falling behind.
pub fn set_coordinator_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("talk_coordinator_mailbox_depth").set(depth as f64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_match_attempt("matched");
        record_session_ended("completed", "duration_elapsed");
        record_session_active_duration(Duration::from_secs(300));
        set_sessions_open(3);
        set_users_available(10);
        record_ledger_entry("session_debit");
        set_coordinator_mailbox_depth(0);
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_match_attempt("matched");
            record_match_attempt("matched");
            record_match_attempt("no_teacher");
            record_session_ended("aborted", "join_timeout");
            record_session_active_duration(Duration::from_secs(10));
            set_sessions_open(2);
            record_ledger_entry("session_refund");
        });

        let metrics = snapshotter.snapshot().into_vec();

        let matched = metrics.iter().find(|(key, _, _, _)| {
            key.key().name() == "talk_match_attempts_total"
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == "outcome" && l.value() == "matched")
        });
        let (_, _, _, value) = matched.expect("match counter should be recorded");
        assert_eq!(value, &DebugValue::Counter(2));

        let open = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "talk_sessions_open")
            .expect("open sessions gauge should be recorded");
        assert_eq!(open.0.kind(), MetricKind::Gauge);

        for name in [
            "talk_sessions_ended_total",
            "talk_session_active_seconds",
            "talk_ledger_entries_total",
        ] {
            assert!(
                metrics.iter().any(|(key, _, _, _)| key.key().name() == name),
                "{name} should be recorded"
            );
        }
    }
}
