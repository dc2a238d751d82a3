//! Knobs for a fan-out run.

use std::time::Duration;

use derive_getters::Getters;

/// Settings shared by every host job in a run. The defaults reproduce plain
/// fire-and-forget fan-out: no concurrency bound and no connect timeout.
#[derive(Getters, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSettings {
    /// Most host jobs allowed to hold a connection at once.
    max_concurrency: Option<usize>,
    /// Applied to each connection leg separately.
    connect_timeout_secs: Option<u64>,
}

impl RunSettings {
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}
