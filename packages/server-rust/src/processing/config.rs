/// Settings of the message-processing manager and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingConfig {
    /// Work items the pool queues before rejecting new ones.
    pub worker_queue_capacity: usize,
    /// Work items the pool runs at the same time.
    pub max_concurrent_work: u32,
    /// Interval between worker pool statistics log lines in milliseconds.
    pub worker_stats_interval_ms: u64,
    /// Whether connector notifications are fired at all.
    pub notifications_enabled: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            worker_queue_capacity: 256,
            max_concurrent_work: 1000,
            worker_stats_interval_ms: 60_000,
            notifications_enabled: true,
        }
    }
}
