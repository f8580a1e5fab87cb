//! Raft timing configuration.

use std::time::Duration;

/// Timing parameters for a Raft node.
///
/// The heartbeat interval and RPC timeout are derived as half of the
/// minimum election timeout unless overridden; the election timeout itself
/// is re-drawn uniformly from `[min, max)` on every timer reset.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Minimum election timeout (default: 150ms)
    pub election_timeout_min: Duration,
    /// Maximum election timeout, exclusive (default: 300ms)
    pub election_timeout_max: Duration,
    /// Interval between leader heartbeats (default: election_timeout_min / 2)
    pub heartbeat_interval: Duration,
    /// Per-call transport timeout (default: heartbeat_interval)
    pub rpc_timeout: Duration,
    /// Deadline for replicating a client command to a majority
    pub commit_timeout: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(75),
            rpc_timeout: Duration::from_millis(75),
            commit_timeout: Duration::from_secs(1),
        }
    }
}

impl RaftConfig {
    /// Set the election timeout range and re-derive the heartbeat interval
    /// and RPC timeout from it.
    pub fn with_election_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.election_timeout_min = min;
        self.election_timeout_max = max;
        self.heartbeat_interval = min / 2;
        self.rpc_timeout = min / 2;
        self
    }

    /// Override the derived heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Override the derived per-call transport timeout.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the deadline for client command replication.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Draw a random election timeout from `[min, max)`.
    pub fn random_election_timeout(&self) -> Duration {
        use rand::Rng;
        let min_ms = self.election_timeout_min.as_millis() as u64;
        let max_ms = self.election_timeout_max.as_millis() as u64;
        if max_ms <= min_ms {
            return self.election_timeout_min;
        }
        let timeout_ms = rand::rng().random_range(min_ms..max_ms);
        Duration::from_millis(timeout_ms)
    }
}
