use serde::Serialize;

/// One live container tracked by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolEntry {
    /// Runtime-assigned ID; unique key of the pool.
    pub container_id: String,
    /// Generated at creation; the container name is derived from it.
    pub sandbox_id: String,
    /// Agent the container was created for. Empty for warm-fill containers.
    pub agent_id: String,
    /// `None` while warm.
    pub session_id: Option<String>,
    /// Set together with `session_id`.
    pub assigned_at: Option<u64>,
    pub created_at: u64,
    /// Insertion order, breaks ties between equal `created_at` values.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl PoolEntry {
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.session_id.is_none()
    }

    pub(crate) fn assign(&mut self, session_id: &str, now: u64) {
        self.session_id = Some(session_id.to_string());
        self.assigned_at = Some(now);
    }

    /// Whether an assigned entry has been held longer than `idle_timeout_ms`.
    pub(crate) fn is_idle(&self, now: u64, idle_timeout_ms: u64) -> bool {
        self.assigned_at
            .is_some_and(|at| now.saturating_sub(at) > idle_timeout_ms)
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub warm: usize,
    pub assigned: usize,
    pub max_containers: usize,
    pub enabled: bool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> PoolEntry {
        PoolEntry {
            container_id: "c1".into(),
            sandbox_id: "s1".into(),
            agent_id: String::new(),
            session_id: None,
            assigned_at: None,
            created_at: 1_000,
            seq: 0,
        }
    }

    #[test]
    fn assign_sets_session_and_timestamp_together() {
        let mut e = entry();
        assert!(e.is_warm());
        e.assign("sess", 2_000);
        assert!(!e.is_warm());
        assert_eq!(e.session_id.as_deref(), Some("sess"));
        assert_eq!(e.assigned_at, Some(2_000));
    }

    #[test]
    fn idle_is_strictly_greater_than_timeout() {
        let mut e = entry();
        assert!(!e.is_idle(u64::MAX, 0), "warm entries are never idle");
        e.assign("sess", 2_000);
        assert!(!e.is_idle(2_500, 500));
        assert!(e.is_idle(2_501, 500));
        assert!(!e.is_idle(1_000, 0), "clock going backwards is not idle");
    }
}
