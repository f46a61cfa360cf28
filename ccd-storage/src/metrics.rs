use std::sync::Arc;

/// Receives driver counters: transferred bytes, commit outcomes, deleted
/// entries and server errors reported by the remote.
///
/// Hosts export these however they like; the driver only counts.
pub trait MetricsCollector: Send + Sync {
    fn bytes_uploaded(&self, amount: u64);
    fn bytes_downloaded(&self, amount: usize);
    fn commit_succeeded(&self);
    fn commit_failed(&self);
    fn entries_deleted(&self, amount: u64);
    fn remote_error(&self);
}

/// Collector dropping every count, used when the host installs none
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn bytes_uploaded(&self, _amount: u64) {}
    fn bytes_downloaded(&self, _amount: usize) {}
    fn commit_succeeded(&self) {}
    fn commit_failed(&self) {}
    fn entries_deleted(&self, _amount: u64) {}
    fn remote_error(&self) {}
}

/// Cloneable handle passed to the gateway and every writer
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn bytes_uploaded(&self, amount: u64) {
        self.0.bytes_uploaded(amount);
    }

    pub fn bytes_downloaded(&self, amount: usize) {
        self.0.bytes_downloaded(amount);
    }

    pub fn commit_succeeded(&self) {
        self.0.commit_succeeded();
    }

    pub fn commit_failed(&self) {
        self.0.commit_failed();
    }

    pub fn entries_deleted(&self, amount: u64) {
        self.0.entries_deleted(amount);
    }

    pub fn remote_error(&self) {
        self.0.remote_error();
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}
