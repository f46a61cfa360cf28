use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

use ccd_storage::{MetricsCollector, SharedMetrics};

lazy_static! {
    static ref BYTES_UPLOADED: IntCounter = register_int_counter!(
        "ccd_bytes_uploaded_total",
        "Bytes uploaded to the remote entry store"
    )
    .unwrap();
    static ref BYTES_DOWNLOADED: IntCounter = register_int_counter!(
        "ccd_bytes_downloaded_total",
        "Bytes downloaded from the remote entry store"
    )
    .unwrap();
    static ref COMMITS: IntCounter =
        register_int_counter!("ccd_commits_total", "Writer commits that published an entry")
            .unwrap();
    static ref COMMIT_FAILURES: IntCounter = register_int_counter!(
        "ccd_commit_failures_total",
        "Writer commits that failed and kept their staging file"
    )
    .unwrap();
    static ref ENTRIES_DELETED: IntCounter =
        register_int_counter!("ccd_entries_deleted_total", "Remote entries deleted").unwrap();
    static ref REMOTE_ERRORS: IntCounter = register_int_counter!(
        "ccd_remote_errors_total",
        "Server errors reported by the remote entry store"
    )
    .unwrap();
}

/// Prometheus backed metrics collector
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    pub fn shared() -> SharedMetrics {
        SharedMetrics::new(Arc::new(PrometheusMetrics))
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn bytes_uploaded(&self, amount: u64) {
        BYTES_UPLOADED.inc_by(amount);
    }

    fn bytes_downloaded(&self, amount: usize) {
        BYTES_DOWNLOADED.inc_by(amount as u64);
    }

    fn commit_succeeded(&self) {
        COMMITS.inc();
    }

    fn commit_failed(&self) {
        COMMIT_FAILURES.inc();
    }

    fn entries_deleted(&self, amount: u64) {
        ENTRIES_DELETED.inc_by(amount);
    }

    fn remote_error(&self) {
        REMOTE_ERRORS.inc();
    }
}

/// Renders the default registry in the Prometheus text format
pub fn render() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_rendered() {
        let metrics = PrometheusMetrics::shared();
        metrics.bytes_uploaded(42);
        metrics.commit_succeeded();

        let text = render().unwrap();
        assert!(text.contains("ccd_bytes_uploaded_total"));
        assert!(text.contains("ccd_commits_total"));
    }
}
