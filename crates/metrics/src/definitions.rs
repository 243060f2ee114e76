//! Metric name and label definitions.

/// Container pool metrics
pub mod pool {
    /// Containers created (warm fill and on-demand)
    pub const CONTAINERS_CREATED_TOTAL: &str = "warmbox_pool_containers_created_total";
    /// Containers stopped and removed, labelled by `reason`
    pub const CONTAINERS_DESTROYED_TOTAL: &str = "warmbox_pool_containers_destroyed_total";
    /// Successful session assignments
    pub const ASSIGNMENTS_TOTAL: &str = "warmbox_pool_assignments_total";
    /// Assignments served from the warm pool
    pub const WARM_HITS_TOTAL: &str = "warmbox_pool_warm_hits_total";
    /// Assignments rejected because the pool was full
    pub const CAPACITY_REJECTIONS_TOTAL: &str = "warmbox_pool_capacity_rejections_total";
    /// Completed maintenance cycles
    pub const MAINTENANCE_CYCLES_TOTAL: &str = "warmbox_pool_maintenance_cycles_total";
    /// Maintenance cycle duration in seconds
    pub const MAINTENANCE_DURATION_SECONDS: &str = "warmbox_pool_maintenance_duration_seconds";
    /// Currently unassigned containers
    pub const WARM: &str = "warmbox_pool_warm";
    /// Currently assigned containers
    pub const ASSIGNED: &str = "warmbox_pool_assigned";
}

/// Container runtime CLI metrics
pub mod runtime {
    /// Runtime commands executed, labelled by `operation`
    pub const COMMANDS_TOTAL: &str = "warmbox_runtime_commands_total";
    /// Runtime commands that exited non-zero or failed to spawn
    pub const COMMAND_FAILURES_TOTAL: &str = "warmbox_runtime_command_failures_total";
    /// Runtime commands killed after exceeding their timeout
    pub const COMMAND_TIMEOUTS_TOTAL: &str = "warmbox_runtime_command_timeouts_total";
    /// Runtime command duration in seconds
    pub const COMMAND_DURATION_SECONDS: &str = "warmbox_runtime_command_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const OPERATION: &str = "operation";
    pub const REASON: &str = "reason";
}

/// Histogram buckets
pub mod buckets {
    /// Runtime command durations, 10ms to 5 minutes
    pub const COMMAND_DURATION: [f64; 12] = [
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
    ];
}
