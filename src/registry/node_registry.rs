//! Worker node liveness and capacity tracking.
//!
//! One mutex guards the whole map. Every operation is a short critical
//! section (no I/O inside the lock), so contention stays negligible even
//! with callbacks and dispatches interleaving.

use crate::models::WorkerPool;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct NodeEntry {
    node_id: String,
    pool: WorkerPool,
    capacity: u32,
    /// GPU class the node advertises, e.g. "a100". Absent for CPU nodes.
    gpu_tier: Option<String>,
    current_load: u32,
    last_heartbeat: DateTime<Utc>,
    /// Registration order, used to break load ties deterministically.
    seq: u64,
}

/// Point-in-time view of a node, handed out so callers never hold the lock.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub pool: WorkerPool,
    pub capacity: u32,
    pub gpu_tier: Option<String>,
    pub current_load: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub seq: u64,
}

impl NodeSnapshot {
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.capacity
    }
}

struct RegistryInner {
    nodes: HashMap<String, NodeEntry>,
    next_seq: u64,
}

pub struct NodeRegistry {
    inner: Mutex<RegistryInner>,
    heartbeat_timeout: Duration,
}

impl NodeRegistry {
    pub fn new(heartbeat_timeout_secs: u64) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                nodes: HashMap::new(),
                next_seq: 0,
            }),
            heartbeat_timeout: Duration::seconds(heartbeat_timeout_secs as i64),
        }
    }

    /// Upsert a node. Re-registering refreshes the heartbeat, capacity,
    /// and GPU tier but keeps the original registration order and current
    /// load.
    pub fn register(&self, node_id: &str, pool: WorkerPool, capacity: u32, gpu_tier: Option<&str>) {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        match inner.nodes.get_mut(node_id) {
            Some(entry) => {
                entry.pool = pool;
                entry.capacity = capacity;
                entry.gpu_tier = gpu_tier.map(str::to_string);
                entry.last_heartbeat = now;
            }
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.nodes.insert(
                    node_id.to_string(),
                    NodeEntry {
                        node_id: node_id.to_string(),
                        pool,
                        capacity,
                        gpu_tier: gpu_tier.map(str::to_string),
                        current_load: 0,
                        last_heartbeat: now,
                        seq,
                    },
                );
                tracing::info!(node_id, pool = %pool, capacity, gpu_tier, "worker node registered");
            }
        }
    }

    pub fn deregister(&self, node_id: &str) -> bool {
        let removed = self.inner.lock().nodes.remove(node_id).is_some();
        if removed {
            tracing::info!(node_id, "worker node deregistered");
        }
        removed
    }

    /// Refresh a node's heartbeat. Unknown nodes are ignored; they must
    /// re-register.
    pub fn heartbeat(&self, node_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.nodes.get_mut(node_id) {
            Some(entry) => {
                entry.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn update_load(&self, node_id: &str, current_load: u32) -> bool {
        let mut inner = self.inner.lock();
        match inner.nodes.get_mut(node_id) {
            Some(entry) => {
                entry.current_load = current_load;
                true
            }
            None => false,
        }
    }

    /// Compare-and-increment a node's load, claiming one slot. Fails if the
    /// node vanished or is already at capacity, which closes the window
    /// between selection and assignment.
    pub fn reserve_slot(&self, node_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.nodes.get_mut(node_id) {
            Some(entry) if entry.current_load < entry.capacity => {
                entry.current_load += 1;
                true
            }
            _ => false,
        }
    }

    pub fn release_slot(&self, node_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.nodes.get_mut(node_id) {
            entry.current_load = entry.current_load.saturating_sub(1);
        }
    }

    /// Live nodes in a pool with spare capacity, sorted by (load, seq).
    /// Nodes whose heartbeat is older than the timeout are excluded.
    pub fn get_available(&self, pool: WorkerPool) -> Vec<NodeSnapshot> {
        let cutoff = Utc::now() - self.heartbeat_timeout;
        let inner = self.inner.lock();
        let mut nodes: Vec<NodeSnapshot> = inner
            .nodes
            .values()
            .filter(|e| e.pool == pool && e.last_heartbeat >= cutoff && e.current_load < e.capacity)
            .map(|e| NodeSnapshot {
                node_id: e.node_id.clone(),
                pool: e.pool,
                capacity: e.capacity,
                gpu_tier: e.gpu_tier.clone(),
                current_load: e.current_load,
                last_heartbeat: e.last_heartbeat,
                seq: e.seq,
            })
            .collect();
        nodes.sort_by_key(|n| (n.current_load, n.seq));
        nodes
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let inner = self.inner.lock();
        let mut nodes: Vec<NodeSnapshot> = inner
            .nodes
            .values()
            .map(|e| NodeSnapshot {
                node_id: e.node_id.clone(),
                pool: e.pool,
                capacity: e.capacity,
                gpu_tier: e.gpu_tier.clone(),
                current_load: e.current_load,
                last_heartbeat: e.last_heartbeat,
                seq: e.seq,
            })
            .collect();
        nodes.sort_by_key(|n| n.seq);
        nodes
    }

    #[cfg(test)]
    pub(crate) fn age_heartbeat(&self, node_id: &str, age: Duration) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.nodes.get_mut(node_id) {
            entry.last_heartbeat = Utc::now() - age;
        }
    }
}
