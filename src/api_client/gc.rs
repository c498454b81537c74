//! Bounds how many remote nodes keep their children listing in memory.
//!
//! Folder and file workers revisit the same ancestors many times during a
//! sync, so every node caches its children. Without a bound, a full sync
//! would end up holding the JSON of the whole account. The collector tracks
//! when each node was last visited and clears the children cache of the
//! least recently visited one whenever the budget is exceeded.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::debug;

/// A node whose children listing can be dropped and re-fetched later.
pub trait ChildCache: Send + Sync {
    /// Stable identity of the node for the lifetime of the process.
    fn cache_id(&self) -> u64;

    /// Forget the cached children. The next lookup goes back to the server.
    fn reset_cache(&self);
}

struct Tracked {
    max_nodes: usize,
    next_age: u64,
    ages: HashMap<u64, u64>,
    oldest: BTreeMap<u64, (u64, Weak<dyn ChildCache>)>,
}

pub struct ChildCacheGarbageCollector {
    tracked: Mutex<Tracked>,
}

impl ChildCacheGarbageCollector {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            tracked: Mutex::new(Tracked {
                max_nodes,
                next_age: 0,
                ages: HashMap::new(),
                oldest: BTreeMap::new(),
            }),
        }
    }

    /// Changes the budget. Takes effect on the next new visit.
    pub fn set_max_nodes(&self, max_nodes: usize) {
        self.tracked.lock().max_nodes = max_nodes;
    }

    pub fn max_nodes(&self) -> usize {
        self.tracked.lock().max_nodes
    }

    /// Number of nodes currently holding a children cache.
    pub fn tracked_len(&self) -> usize {
        self.tracked.lock().ages.len()
    }

    pub fn heap_len(&self) -> usize {
        self.tracked.lock().oldest.len()
    }

    /// Records `node` as just visited, evicting the oldest entries when the
    /// budget is exceeded.
    ///
    /// Evicted caches are reset after the collector lock is released: a node
    /// calling `visited` may hold its own lock, and resetting another node
    /// takes that node's lock.
    pub fn visited<T: ChildCache + 'static>(&self, node: &Arc<T>) {
        let id = node.cache_id();
        let evicted = {
            let mut tracked = self.tracked.lock();
            let age = tracked.next_age;
            tracked.next_age += 1;

            if let Some(previous) = tracked.ages.insert(id, age) {
                if let Some(entry) = tracked.oldest.remove(&previous) {
                    tracked.oldest.insert(age, entry);
                }
                return;
            }

            let weak: Weak<dyn ChildCache> = Arc::downgrade(node) as Weak<dyn ChildCache>;
            tracked.oldest.insert(age, (id, weak));

            let mut evicted = Vec::new();
            while tracked.ages.len() > tracked.max_nodes {
                let Some((_, (oldest_id, weak))) = tracked.oldest.pop_first() else {
                    break;
                };
                tracked.ages.remove(&oldest_id);
                // Nodes dropped since their last visit have nothing left to reset.
                if let Some(node) = weak.upgrade() {
                    evicted.push(node);
                }
            }
            evicted
        };

        for node in evicted {
            debug!(node = node.cache_id(), "clearing children cache");
            node.reset_cache();
        }
    }
}
