use std::time::Duration;

/// How long the guard lets one node occupy the critical section.
pub const DEFAULT_HOLD: Duration = Duration::from_millis(5000);

pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Runtime knobs for a spawned cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Fixed critical-section hold enforced by the resource guard.
    pub hold: Duration,
    /// Bound of every node mailbox and of the guard's claim channel.
    pub mailbox_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            hold: DEFAULT_HOLD,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl ClusterConfig {
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        // a zero-capacity mpsc channel panics on creation
        self.mailbox_capacity = capacity.max(1);
        self
    }
}
