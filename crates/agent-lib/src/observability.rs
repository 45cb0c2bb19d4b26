//! Structured logging helpers
//!
//! Lifecycle and per-cycle records carry the node name so log lines from
//! many agents can be told apart once aggregated.

use crate::collector::CycleStats;
use std::time::Duration;
use tracing::{info, warn};

/// Emits lifecycle and cycle summary records
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_startup(&self, version: &str, period: Duration, output_hosts: usize) {
        info!(
            event_type = "startup",
            node_name = %self.node_name,
            version = %version,
            period_secs = period.as_secs_f64(),
            output_hosts,
            "hpa-shipper started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event_type = "shutdown",
            node_name = %self.node_name,
            reason = %reason,
            "hpa-shipper shutting down"
        );
    }

    /// Summary of one collection cycle; warns when anything was dropped
    pub fn log_cycle(&self, stats: &CycleStats, elapsed: Duration) {
        if stats.is_clean() {
            info!(
                event_type = "cycle",
                node_name = %self.node_name,
                namespaces = stats.namespaces,
                autoscalers = stats.autoscalers,
                delivered = stats.delivered,
                elapsed_ms = elapsed.as_millis() as u64,
                "Collection cycle complete"
            );
        } else {
            warn!(
                event_type = "cycle",
                node_name = %self.node_name,
                namespaces = stats.namespaces,
                namespaces_failed = stats.namespaces_failed,
                listing_failed = stats.listing_failed,
                autoscalers = stats.autoscalers,
                delivered = stats.delivered,
                failed = stats.failed,
                elapsed_ms = elapsed.as_millis() as u64,
                "Collection cycle completed with errors"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("node-a");
        assert_eq!(logger.node_name(), "node-a");

        // Logging without a subscriber installed is a no-op
        logger.log_startup("0.1.0", Duration::from_secs(10), 2);
        logger.log_cycle(&CycleStats::default(), Duration::from_millis(5));
        logger.log_shutdown("test");
    }
}
