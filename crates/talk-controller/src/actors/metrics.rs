//! Coordinator mailbox monitoring and actor counters.
//!
//! | Level    | Depth      |
//! |----------|------------|
//! | Normal   | < 100      |
//! | Warning  | 100 - 500  |
//! | Critical | > 500      |
//!
//! The handle records an enqueue before sending; the actor records the
//! dequeue once a message is handled, so `current_depth` is the real backlog.

use crate::observability::metrics::set_coordinator_mailbox_depth;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth below which the coordinator is considered healthy.
pub const COORDINATOR_MAILBOX_NORMAL: usize = 100;

/// Mailbox depth above which the backlog is critical.
pub const COORDINATOR_MAILBOX_WARNING: usize = 500;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor shared by the coordinator and its handles.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Instance identifier for log fields.
    service_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        let level = level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "talk.actor.mailbox",
                service_id = %self.service_id,
                depth = new_depth,
                threshold = COORDINATOR_MAILBOX_WARNING,
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == COORDINATOR_MAILBOX_NORMAL + 1 {
            // Log once when crossing into warning
            debug!(
                target: "talk.actor.mailbox",
                service_id = %self.service_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message leaving the mailbox (handled).
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        set_coordinator_mailbox_depth(previous.saturating_sub(1));
    }

    /// Record a message that never reached the actor (channel closed).
    pub fn record_drop(&self) {
        self.depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .ok();
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "talk.actor.mailbox",
            service_id = %self.service_id,
            dropped = self.messages_dropped.load(Ordering::Relaxed),
            "Message dropped, coordinator unavailable"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > COORDINATOR_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > COORDINATOR_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}

/// Counters for timer activity, read by diagnostics and tests.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Timers currently scheduled.
    pub timers_pending: AtomicUsize,
    /// Timers that fired and changed a session.
    pub timers_applied: AtomicU64,
    /// Timers that fired after the session moved on.
    pub timers_stale: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_timers_pending(&self, count: usize) {
        self.timers_pending.store(count, Ordering::Relaxed);
    }

    pub fn record_timer_applied(&self) {
        self.timers_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timer_stale(&self) {
        self.timers_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn timers_pending(&self) -> usize {
        self.timers_pending.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn timers_applied(&self) -> u64 {
        self.timers_applied.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn timers_stale(&self) -> u64 {
        self.timers_stale.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_depth_tracking() {
        let monitor = MailboxMonitor::new("talk-test");

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("talk-test");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..150 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..400 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_mailbox_monitor_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new("talk-test");
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_mailbox_monitor_drop() {
        let monitor = MailboxMonitor::new("talk-test");
        monitor.record_enqueue();
        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 1);
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_actor_metrics_timers() {
        let metrics = ActorMetrics::new();
        metrics.set_timers_pending(2);
        metrics.record_timer_applied();
        metrics.record_timer_stale();
        metrics.record_timer_stale();

        assert_eq!(metrics.timers_pending(), 2);
        assert_eq!(metrics.timers_applied(), 1);
        assert_eq!(metrics.timers_stale(), 2);
    }
}
