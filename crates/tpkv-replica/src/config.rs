use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// overall transaction deadline, in microseconds
    pub txn_timeout_us: u64,
    /// when set, a peer only applies a commit whose sender matches its
    /// current promise; when unset, any promised peer applies (the weak
    /// acceptance rule of the original protocol)
    pub strict_commit: bool,
}

impl ReplicaConfig {
    #[must_use]
    pub const fn txn_timeout(&self) -> Duration {
        Duration::from_micros(self.txn_timeout_us)
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self { txn_timeout_us: 10_000_000, strict_commit: false }
    }
}
