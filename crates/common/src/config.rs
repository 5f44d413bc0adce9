//! Common configuration types for 5min Talk components.

use serde::{Deserialize, Serialize};

/// Default tracing filter directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "talk_controller=debug,tower_http=debug";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Fallback filter directive (used when `RUST_LOG` is not set)
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}
