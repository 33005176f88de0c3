//! Transitive closure of the group-in-group graph
//!
//! The closure is rebuilt wholesale from the committed edge set:
//!
//! 1. Build a `parent -> children` adjacency map from the edges
//! 2. For every parent, walk the map depth-first collecting every reachable
//!    group; a per-root visited set makes the walk terminate on cycles
//! 3. Replace the stored closure in one transaction
//!
//! Cost is O(V * (V + E)) in the worst case, paid once per rebuild so that
//! membership checks are plain lookups.

use crate::error::{GroupError, Result};
use crate::store::GroupStore;
use crate::types::{ClosureEntry, GroupEdge, GroupId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Adjacency map `parent -> direct children`
pub fn adjacency_map<'a, I>(edges: I) -> BTreeMap<GroupId, BTreeSet<GroupId>>
where
    I: IntoIterator<Item = &'a GroupEdge>,
{
    let mut adjacency: BTreeMap<GroupId, BTreeSet<GroupId>> = BTreeMap::new();
    for edge in edges {
        adjacency.entry(edge.parent).or_default().insert(edge.child);
    }
    adjacency
}

/// Every group reachable from `root` by one or more edges
///
/// `root` itself is only included when it lies on a cycle.
pub fn descendants(
    adjacency: &BTreeMap<GroupId, BTreeSet<GroupId>>,
    root: GroupId,
) -> BTreeSet<GroupId> {
    let mut visited = BTreeSet::new();
    let mut stack: Vec<GroupId> = match adjacency.get(&root) {
        Some(children) => children.iter().copied().collect(),
        None => return visited,
    };

    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        if let Some(children) = adjacency.get(&node) {
            stack.extend(children.iter().filter(|c| !visited.contains(*c)).copied());
        }
    }

    visited
}

/// Compute the full closure of an edge set
pub fn compute_closure(edges: &[GroupEdge]) -> Vec<ClosureEntry> {
    let adjacency = adjacency_map(edges);

    adjacency
        .keys()
        .flat_map(|&parent| {
            descendants(&adjacency, parent)
                .into_iter()
                .map(move |child| ClosureEntry { parent, child })
        })
        .collect()
}

/// Rebuild statistics
#[derive(Debug, Clone, Default)]
pub struct ClosureStats {
    /// Successful rebuilds
    pub rebuilds: u64,

    /// Rebuilds that failed and left the previous closure in place
    pub failures: u64,

    /// Edge count read by the last successful rebuild
    pub last_edge_count: usize,

    /// Closure entries written by the last successful rebuild
    pub last_entry_count: usize,

    /// Duration of the last successful rebuild
    pub last_duration: Duration,

    /// When the last successful rebuild committed
    pub last_rebuilt_at: Option<DateTime<Utc>>,
}

/// Materialized closure cache over a [`GroupStore`]
///
/// Rebuilds are serialized in-process; the store serializes them across
/// processes and reads the edges under the same lock it writes with.
pub struct ClosureCache {
    store: Arc<dyn GroupStore>,
    rebuild_lock: Mutex<()>,
    stats: RwLock<ClosureStats>,
}

impl ClosureCache {
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        Self {
            store,
            rebuild_lock: Mutex::new(()),
            stats: RwLock::new(ClosureStats::default()),
        }
    }

    /// Recompute the closure from the committed edges and replace the
    /// stored closure atomically
    ///
    /// On error the previously committed closure is left untouched.
    /// Returns the number of closure entries written.
    pub async fn rebuild(&self) -> Result<usize> {
        let _guard = self.rebuild_lock.lock().await;
        let start = Instant::now();

        let rebuild = match self.store.rebuild_closure(compute_closure).await {
            Ok(rebuild) => rebuild,
            Err(e) => return Err(self.record_failure(e).await),
        };

        let elapsed = start.elapsed();
        {
            let mut stats = self.stats.write().await;
            stats.rebuilds += 1;
            stats.last_edge_count = rebuild.edge_count;
            stats.last_entry_count = rebuild.entry_count;
            stats.last_duration = elapsed;
            stats.last_rebuilt_at = Some(Utc::now());
        }

        info!(
            "Group closure rebuilt: {} edges -> {} entries in {:.2}ms",
            rebuild.edge_count,
            rebuild.entry_count,
            elapsed.as_secs_f64() * 1000.0
        );
        Ok(rebuild.entry_count)
    }

    /// Current closure entries
    pub async fn entries(&self) -> Result<Vec<ClosureEntry>> {
        self.store.closure().await
    }

    /// Rebuild statistics
    pub async fn stats(&self) -> ClosureStats {
        self.stats.read().await.clone()
    }

    async fn record_failure(&self, err: GroupError) -> GroupError {
        self.stats.write().await.failures += 1;
        warn!("Group closure rebuild failed, previous closure kept: {}", err);
        err
    }
}
