//! Health report types.

use serde::Serialize;

/// Overall store health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store answers queries.
    Healthy,
    /// Store is reachable but a probe failed.
    Degraded,
}

impl HealthStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of store health and size statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    /// Probe outcome.
    pub status: HealthStatus,
    /// Size of the database file plus its WAL, in bytes.
    pub backing_store_size_bytes: u64,
    /// Number of live records (expired rows included until swept).
    pub total_records: u64,
    /// Configured pool capacity.
    pub pool_size: usize,
    /// Connections currently lent out.
    pub active_connections: usize,
}
