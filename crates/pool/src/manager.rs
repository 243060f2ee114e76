//! Pool manager: warm fill, session assignment, maintenance, shutdown.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    futures::future::join_all,
    tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    warmbox_common::{ResourceLimits, now_ms},
    warmbox_config::PoolConfig,
    warmbox_policy::PolicyStore,
    warmbox_runtime::{
        CommandOutput, ContainerRuntime, ContainerStatus, SandboxConfig, validate_work_dir,
    },
};

#[cfg(feature = "metrics")]
use warmbox_metrics::{counter, gauge, histogram, labels, pool as pool_metrics};

use crate::{
    entry::{PoolEntry, PoolStats},
    error::{PoolError, Result},
};

/// Pool membership plus the bookkeeping needed to make capacity decisions
/// atomically. Guarded by a single mutex that is never held across runtime calls.
#[derive(Default)]
struct PoolState {
    entries: HashMap<String, PoolEntry>,
    enabled: bool,
    /// Bumped by `initialize` and `shutdown`; creations that finish under an
    /// older generation destroy their container instead of inserting it.
    generation: u64,
    /// Creations in flight. They count against `max_containers`.
    pending: usize,
    /// Subset of `pending` that will land as warm entries.
    pending_warm: usize,
    /// Sessions whose claim has not finished starting yet.
    pending_sessions: HashSet<String>,
    next_seq: u64,
}

impl PoolState {
    fn warm_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_warm()).count()
    }

    fn occupied(&self) -> usize {
        self.entries.len() + self.pending
    }

    /// Oldest-created warm entry, insertion order breaking ties.
    fn oldest_warm(&self) -> Option<String> {
        self.entries
            .values()
            .filter(|e| e.is_warm())
            .min_by_key(|e| (e.created_at, e.seq))
            .map(|e| e.container_id.clone())
    }

    fn find_session(&self, session_id: &str) -> Option<&PoolEntry> {
        self.entries
            .values()
            .find(|e| e.session_id.as_deref() == Some(session_id))
    }

    fn new_entry(&mut self, container_id: String, config: &SandboxConfig) -> PoolEntry {
        let seq = self.next_seq;
        self.next_seq += 1;
        PoolEntry {
            container_id,
            sandbox_id: config.id.clone(),
            agent_id: config.agent_id.clone(),
            session_id: None,
            assigned_at: None,
            created_at: config.created_at,
            seq,
        }
    }

    fn stats(&self, max_containers: usize) -> PoolStats {
        let warm = self.warm_count();
        PoolStats {
            total: self.entries.len(),
            warm,
            assigned: self.entries.len() - warm,
            max_containers,
            enabled: self.enabled,
        }
    }
}

#[cfg(feature = "metrics")]
fn record_occupancy(state: &PoolState) {
    let warm = state.warm_count();
    gauge!(pool_metrics::WARM).set(warm as f64);
    gauge!(pool_metrics::ASSIGNED).set((state.entries.len() - warm) as f64);
}

#[cfg(not(feature = "metrics"))]
fn record_occupancy(_state: &PoolState) {}

/// Result of the locked decision phase of an assignment.
enum Claim {
    /// A warm entry was bound to the session.
    Warm(String),
    /// Capacity was reserved for an on-demand creation.
    Reserved { generation: u64 },
}

struct MaintenanceTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the live pool of sandbox containers.
pub struct PoolManager {
    config: PoolConfig,
    /// Neutral limits applied to warm-fill containers.
    warm_limits: ResourceLimits,
    runtime: Arc<dyn ContainerRuntime>,
    policies: Arc<dyn PolicyStore>,
    state: Mutex<PoolState>,
    /// Held for the duration of one maintenance cycle.
    maintenance_lock: Mutex<()>,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl PoolManager {
    pub fn new(
        config: PoolConfig,
        warm_limits: ResourceLimits,
        runtime: Arc<dyn ContainerRuntime>,
        policies: Arc<dyn PolicyStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            warm_limits,
            runtime,
            policies,
            state: Mutex::new(PoolState::default()),
            maintenance_lock: Mutex::new(()),
            maintenance: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Probe the runtime, purge leftovers from a previous run, fill the warm
    /// pool and start the maintenance timer.
    ///
    /// Returns `false` (and stays disabled) when the runtime is unavailable.
    /// An already enabled pool is left alone without probing.
    pub async fn initialize(self: &Arc<Self>) -> bool {
        if self.state.lock().await.enabled {
            debug!("sandbox pool already initialized");
            return true;
        }

        if !self.runtime.is_available().await {
            warn!(
                backend = self.runtime.backend_name(),
                "container runtime unavailable; sandbox pool disabled"
            );
            return false;
        }

        // Before enabling, so nothing created by this process can be swept up.
        let purged = self.cleanup_stale_containers().await;

        let generation = {
            let mut state = self.state.lock().await;
            state.enabled = true;
            state.generation += 1;
            state.generation
        };

        let created = self.fill_pool().await;
        if self.state.lock().await.generation != generation {
            debug!("sandbox pool shut down during initialization");
            return false;
        }
        self.start_maintenance().await;

        info!(
            backend = self.runtime.backend_name(),
            purged,
            warm = created,
            warm_target = self.config.warm_pool_size,
            max_containers = self.config.max_containers,
            "sandbox pool initialized"
        );
        true
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Bind a container to `session_id` and return its runtime ID.
    ///
    /// Warm containers are handed out oldest first. Requesting a `work_dir`
    /// bypasses the warm pool, since the mount has to exist at creation time.
    /// A session that already holds a started container gets the same one
    /// back; while its claim is still being created or started, callers get
    /// [`PoolError::AssignmentInProgress`].
    pub async fn assign_container(
        self: &Arc<Self>,
        agent_id: &str,
        session_id: &str,
        work_dir: Option<&Path>,
    ) -> Result<String> {
        if !self.is_enabled().await {
            return Err(PoolError::NotEnabled);
        }
        // Before any capacity is reserved.
        let work_dir = match work_dir {
            Some(path) => Some(validate_work_dir(path).await?),
            None => None,
        };

        let claim = {
            let mut state = self.state.lock().await;
            if !state.enabled {
                return Err(PoolError::NotEnabled);
            }
            if state.pending_sessions.contains(session_id) {
                return Err(PoolError::AssignmentInProgress {
                    session_id: session_id.to_string(),
                });
            }
            if let Some(existing) = state.find_session(session_id) {
                debug!(session_id, container_id = %existing.container_id, "session already assigned");
                return Ok(existing.container_id.clone());
            }

            let warm = if work_dir.is_none() {
                state.oldest_warm()
            } else {
                None
            };
            match warm {
                Some(container_id) => {
                    if let Some(entry) = state.entries.get_mut(&container_id) {
                        entry.assign(session_id, now_ms());
                    }
                    state.pending_sessions.insert(session_id.to_string());
                    record_occupancy(&state);
                    Claim::Warm(container_id)
                },
                None => {
                    if state.occupied() >= self.config.max_containers {
                        #[cfg(feature = "metrics")]
                        counter!(pool_metrics::CAPACITY_REJECTIONS_TOTAL).increment(1);
                        warn!(
                            session_id,
                            max_containers = self.config.max_containers,
                            "sandbox pool at capacity"
                        );
                        return Err(PoolError::AtCapacity {
                            max: self.config.max_containers,
                        });
                    }
                    state.pending += 1;
                    state.pending_sessions.insert(session_id.to_string());
                    Claim::Reserved {
                        generation: state.generation,
                    }
                },
            }
        };

        let started = self
            .start_claim(claim, agent_id, session_id, work_dir)
            .await;
        self.state.lock().await.pending_sessions.remove(session_id);
        let container_id = started?;

        #[cfg(feature = "metrics")]
        counter!(pool_metrics::ASSIGNMENTS_TOTAL).increment(1);
        info!(container_id, session_id, agent_id, "assigned container to session");

        self.spawn_refill();
        Ok(container_id)
    }

    /// Create the container for a reservation if needed, then start it. On
    /// failure nothing is left in the pool for the session.
    async fn start_claim(
        &self,
        claim: Claim,
        agent_id: &str,
        session_id: &str,
        work_dir: Option<PathBuf>,
    ) -> Result<String> {
        let container_id = match claim {
            Claim::Warm(container_id) => {
                #[cfg(feature = "metrics")]
                counter!(pool_metrics::WARM_HITS_TOTAL).increment(1);
                container_id
            },
            Claim::Reserved { generation } => {
                let created = self.create_for_agent(agent_id, work_dir).await;

                let mut state = self.state.lock().await;
                state.pending = state.pending.saturating_sub(1);
                let (container_id, config) = created?;

                if !state.enabled || state.generation != generation {
                    drop(state);
                    self.destroy(&container_id, "shutdown").await;
                    return Err(PoolError::NotEnabled);
                }

                let mut entry = state.new_entry(container_id.clone(), &config);
                entry.assign(session_id, now_ms());
                state.entries.insert(container_id.clone(), entry);
                record_occupancy(&state);
                container_id
            },
        };

        if let Err(e) = self.runtime.start_container(&container_id).await {
            warn!(container_id, session_id, error = %e, "failed to start assigned container");
            self.discard(&container_id, "start-failed").await;
            return Err(e.into());
        }

        // Shutdown or release may have raced the start.
        let state = self.state.lock().await;
        if !state.entries.contains_key(&container_id) {
            return Err(if state.enabled {
                PoolError::NoContainer {
                    session_id: session_id.to_string(),
                }
            } else {
                PoolError::NotEnabled
            });
        }
        Ok(container_id)
    }

    /// Stop and remove the session's container. Unknown sessions are a no-op.
    pub async fn release_container(&self, session_id: &str) {
        let entry = {
            let mut state = self.state.lock().await;
            let container_id = state
                .find_session(session_id)
                .map(|e| e.container_id.clone());
            let entry = container_id.and_then(|id| state.entries.remove(&id));
            record_occupancy(&state);
            entry
        };

        let Some(entry) = entry else {
            debug!(session_id, "release for session without container");
            return;
        };

        self.destroy(&entry.container_id, "released").await;
        info!(container_id = %entry.container_id, session_id, "released session container");
    }

    pub async fn get_container_for_session(&self, session_id: &str) -> Option<PoolEntry> {
        self.state.lock().await.find_session(session_id).cloned()
    }

    pub async fn get_pool_stats(&self) -> PoolStats {
        self.state.lock().await.stats(self.config.max_containers)
    }

    /// Run `command` inside the container assigned to `session_id`. `None`
    /// uses the runtime's configured exec timeout.
    pub async fn exec_in_session(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let container_id = self
            .get_container_for_session(session_id)
            .await
            .map(|e| e.container_id)
            .ok_or_else(|| PoolError::NoContainer {
                session_id: session_id.to_string(),
            })?;
        Ok(self
            .runtime
            .exec_in_container(&container_id, command, timeout)
            .await?)
    }

    /// Stop the timer, destroy every pooled container and disable the pool.
    /// Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let task = self.maintenance.lock().await.take();
        if let Some(task) = task {
            task.token.cancel();
            // Lets an in-flight cycle finish before the pool is drained.
            if let Err(e) = task.handle.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }

        let entries: Vec<PoolEntry> = {
            let mut state = self.state.lock().await;
            state.enabled = false;
            state.generation += 1;
            let drained = state.entries.drain().map(|(_, e)| e).collect();
            record_occupancy(&state);
            drained
        };

        let count = entries.len();
        join_all(
            entries
                .iter()
                .map(|e| self.destroy(&e.container_id, "shutdown")),
        )
        .await;

        info!(destroyed = count, "sandbox pool shut down");
    }

    /// Create warm containers until the warm target is met or capacity runs out.
    /// Returns how many were added. Individual failures are logged.
    pub async fn fill_pool(&self) -> usize {
        let (needed, generation) = {
            let mut state = self.state.lock().await;
            if !state.enabled {
                return 0;
            }
            let warm = state.warm_count() + state.pending_warm;
            let wanted = self.config.warm_pool_size.saturating_sub(warm);
            let room = self.config.max_containers.saturating_sub(state.occupied());
            let needed = wanted.min(room);
            state.pending += needed;
            state.pending_warm += needed;
            (needed, state.generation)
        };
        if needed == 0 {
            return 0;
        }

        debug!(needed, "filling warm pool");
        let configs: Vec<SandboxConfig> = (0..needed)
            .map(|_| SandboxConfig::new("", self.config.default_image.clone(), &self.warm_limits))
            .collect();
        let results = join_all(
            configs
                .iter()
                .map(|config| self.runtime.create_container(config, &self.warm_limits)),
        )
        .await;

        let mut added = 0;
        let mut orphans = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.pending = state.pending.saturating_sub(needed);
            state.pending_warm = state.pending_warm.saturating_sub(needed);
            let current = state.enabled && state.generation == generation;

            for (config, result) in configs.iter().zip(results) {
                match result {
                    Ok(container_id) if current => {
                        #[cfg(feature = "metrics")]
                        counter!(pool_metrics::CONTAINERS_CREATED_TOTAL).increment(1);
                        let entry = state.new_entry(container_id.clone(), config);
                        state.entries.insert(container_id, entry);
                        added += 1;
                    },
                    Ok(container_id) => orphans.push(container_id),
                    Err(e) => {
                        warn!(sandbox_id = %config.id, error = %e, "failed to create warm container");
                    },
                }
            }
            record_occupancy(&state);
        }

        for container_id in orphans {
            self.destroy(&container_id, "shutdown").await;
        }
        added
    }

    /// One maintenance cycle: recycle idle assignments, prune dead warm
    /// containers, refill. Never fails; a cycle already in progress makes
    /// this call a no-op.
    pub async fn run_maintenance(&self) {
        let Ok(_cycle) = self.maintenance_lock.try_lock() else {
            debug!("maintenance cycle already running, skipping");
            return;
        };
        if !self.is_enabled().await {
            return;
        }

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let recycled = self.recycle_idle().await;
        let pruned = self.prune_dead_warm().await;
        let filled = self.fill_pool().await;

        #[cfg(feature = "metrics")]
        {
            counter!(pool_metrics::MAINTENANCE_CYCLES_TOTAL).increment(1);
            histogram!(pool_metrics::MAINTENANCE_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        if recycled + pruned + filled > 0 {
            info!(recycled, pruned, filled, "sandbox pool maintenance");
        } else {
            debug!("sandbox pool maintenance: nothing to do");
        }
    }

    /// Remove every runtime container carrying this system's name prefix that
    /// the pool does not track. Returns how many were removed.
    pub async fn cleanup_stale_containers(&self) -> usize {
        let listed = match self.runtime.list_sandbox_containers().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not list stale sandbox containers");
                return 0;
            },
        };

        let stale: Vec<String> = {
            let state = self.state.lock().await;
            listed
                .into_iter()
                .filter(|id| !state.entries.keys().any(|tracked| tracked.starts_with(id.as_str())))
                .collect()
        };

        for container_id in &stale {
            info!(container_id, "removing stale sandbox container");
            self.destroy(container_id, "stale").await;
        }
        stale.len()
    }

    async fn recycle_idle(&self) -> usize {
        let now = now_ms();
        let idle: Vec<PoolEntry> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .entries
                .values()
                .filter(|e| e.is_idle(now, self.config.idle_timeout_ms))
                .map(|e| e.container_id.clone())
                .collect();
            let removed = ids
                .iter()
                .filter_map(|id| state.entries.remove(id))
                .collect();
            record_occupancy(&state);
            removed
        };

        for entry in &idle {
            info!(
                container_id = %entry.container_id,
                session_id = entry.session_id.as_deref().unwrap_or_default(),
                "recycling idle session container"
            );
            self.destroy(&entry.container_id, "idle").await;
        }
        idle.len()
    }

    async fn prune_dead_warm(&self) -> usize {
        let warm: Vec<String> = {
            let state = self.state.lock().await;
            state
                .entries
                .values()
                .filter(|e| e.is_warm())
                .map(|e| e.container_id.clone())
                .collect()
        };

        let mut pruned = 0;
        for container_id in warm {
            let status = self
                .runtime
                .container_status(&container_id)
                .await
                .map(|info| info.status);
            if status.is_some_and(|s| s != ContainerStatus::Error) {
                continue;
            }

            // Only if it is still warm: an assignment may have claimed it meanwhile.
            let removed = {
                let mut state = self.state.lock().await;
                let still_warm = state
                    .entries
                    .get(&container_id)
                    .is_some_and(PoolEntry::is_warm);
                let removed = still_warm && state.entries.remove(&container_id).is_some();
                record_occupancy(&state);
                removed
            };
            if removed {
                warn!(container_id, ?status, "pruning unusable warm container");
                self.destroy(&container_id, "dead").await;
                pruned += 1;
            }
        }
        pruned
    }

    /// Resolve the agent's policy and create a container for it.
    async fn create_for_agent(
        &self,
        agent_id: &str,
        work_dir: Option<PathBuf>,
    ) -> Result<(String, SandboxConfig)> {
        let limits = self.policies.get_agent_policy(agent_id).await?;
        let stored = self.policies.get_agent_override(agent_id).await?;

        let (image, mounts, policy_work_dir) = match stored {
            Some(policy) => (
                policy
                    .image
                    .unwrap_or_else(|| self.config.default_image.clone()),
                policy.read_only_mounts,
                policy.work_dir,
            ),
            None => (self.config.default_image.clone(), Vec::new(), None),
        };

        let config = SandboxConfig::new(agent_id, image, &limits)
            .with_read_only_mounts(mounts)
            .with_work_dir(work_dir.or(policy_work_dir));
        let container_id = self.runtime.create_container(&config, &limits).await?;

        #[cfg(feature = "metrics")]
        counter!(pool_metrics::CONTAINERS_CREATED_TOTAL).increment(1);
        Ok((container_id, config))
    }

    fn spawn_refill(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let added = manager.fill_pool().await;
            if added > 0 {
                debug!(added, "warm pool replenished");
            }
        });
    }

    /// Drop the entry (if still tracked) and destroy its container.
    async fn discard(&self, container_id: &str, reason: &'static str) {
        {
            let mut state = self.state.lock().await;
            state.entries.remove(container_id);
            record_occupancy(&state);
        }
        self.destroy(container_id, reason).await;
    }

    /// Best-effort stop then remove.
    async fn destroy(&self, container_id: &str, reason: &'static str) {
        if !self.runtime.stop_container(container_id, None).await {
            debug!(container_id, "stop failed, removing anyway");
        }
        self.runtime.remove_container(container_id).await;

        #[cfg(feature = "metrics")]
        counter!(pool_metrics::CONTAINERS_DESTROYED_TOTAL, labels::REASON => reason).increment(1);
        debug!(container_id, reason, "destroyed sandbox container");
    }

    async fn start_maintenance(self: &Arc<Self>) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let manager = Arc::downgrade(self);
        let period = self.config.maintenance_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.run_maintenance().await;
                    },
                }
            }
            debug!("sandbox pool maintenance loop stopped");
        });

        let previous = self
            .maintenance
            .lock()
            .await
            .replace(MaintenanceTask { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }
}
