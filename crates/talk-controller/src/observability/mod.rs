//! Observability for the talk controller.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Metric labels are bounded enums rendered as `&'static str`.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `talk_match_attempts_total` | Counter | `outcome` | Match attempts by result |
//! | `talk_sessions_ended_total` | Counter | `status`, `reason` | Session outcomes |
//! | `talk_session_active_seconds` | Histogram | none | Talk time of ended sessions |
//! | `talk_sessions_open` | Gauge | none | Pending plus active sessions |
//! | `talk_users_available` | Gauge | none | Users waiting to be matched |
//! | `talk_ledger_entries_total` | Counter | `kind` | Points movements |
//! | `talk_coordinator_mailbox_depth` | Gauge | none | Coordinator backlog |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
