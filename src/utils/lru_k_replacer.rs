use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use super::replacer::{AccessType, LRUKNode, Replacer, Tombstones};
use crate::buffer::buffer_pool_manager::FrameId;

type EvictionKey = (u64, FrameId);

/// LRU-K replacer that keeps evictable frames pre-sorted.
///
/// Evictable frames live in exactly one of two ordered sets:
///
/// - `cold`: fewer than `k` recorded accesses (+inf backward k-distance),
///   keyed by their oldest access.
/// - `hot`: a full `k`-entry history, keyed by the k-th most recent access.
///   The smallest key has the largest backward k-distance.
///
/// `evict` pops `cold` before `hot`. Every history change or evictability
/// flip on an evictable frame re-keys it, so neither set ever needs a scan.
pub struct LRUKReplacer {
    node_store: HashMap<FrameId, LRUKNode>,
    cold: BTreeSet<EvictionKey>,
    hot: BTreeSet<EvictionKey>,
    tombstones: Tombstones,
    current_timestamp: u64,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(number_of_frames: usize, k: usize) -> Self {
        Self::with_tombstones(number_of_frames, k, number_of_frames)
    }

    pub fn with_tombstones(number_of_frames: usize, k: usize, tombstone_capacity: usize) -> Self {
        assert!(k > 0, "k must be at least 1");
        LRUKReplacer {
            node_store: HashMap::with_capacity(number_of_frames),
            cold: BTreeSet::new(),
            hot: BTreeSet::new(),
            tombstones: Tombstones::new(tombstone_capacity),
            current_timestamp: 0,
            replacer_size: number_of_frames,
            k,
        }
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn is_tombstoned(&self, frame_id: FrameId) -> bool {
        self.tombstones.contains(frame_id)
    }

    fn check_frame(&self, frame_id: FrameId) {
        assert!(
            frame_id < self.replacer_size,
            "frame id {} out of range (replacer holds {} frames)",
            frame_id,
            self.replacer_size
        );
    }

    fn index(cold: &mut BTreeSet<EvictionKey>, hot: &mut BTreeSet<EvictionKey>, node: &LRUKNode) {
        let key = (node.earliest_timestamp(), node.frame_id);
        let inserted = if node.has_full_history() {
            hot.insert(key)
        } else {
            cold.insert(key)
        };
        debug_assert!(inserted, "frame {} indexed twice", node.frame_id);
    }

    fn unindex(cold: &mut BTreeSet<EvictionKey>, hot: &mut BTreeSet<EvictionKey>, node: &LRUKNode) {
        let key = (node.earliest_timestamp(), node.frame_id);
        let removed = if node.has_full_history() {
            hot.remove(&key)
        } else {
            cold.remove(&key)
        };
        debug_assert!(removed, "frame {} missing from eviction index", node.frame_id);
    }

    #[cfg(test)]
    pub(crate) fn history_len(&self, frame_id: FrameId) -> Option<usize> {
        self.node_store.get(&frame_id).map(|node| node.history.len())
    }
}

impl Replacer for LRUKReplacer {
    fn record_access(&mut self, frame_id: FrameId, _access_type: AccessType) {
        self.check_frame(frame_id);

        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;

        let k = self.k;
        let tombstones = &mut self.tombstones;
        let node = self.node_store.entry(frame_id).or_insert_with(|| {
            tombstones
                .recover(frame_id)
                .unwrap_or_else(|| LRUKNode::new(frame_id, k))
        });

        if node.is_evictable {
            Self::unindex(&mut self.cold, &mut self.hot, node);
            node.push_timestamp(timestamp);
            Self::index(&mut self.cold, &mut self.hot, node);
        } else {
            node.push_timestamp(timestamp);
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        self.check_frame(frame_id);

        let Some(node) = self.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable != evictable {
            if evictable {
                Self::index(&mut self.cold, &mut self.hot, node);
            } else {
                Self::unindex(&mut self.cold, &mut self.hot, node);
            }
            node.is_evictable = evictable;
        }
        self.current_timestamp += 1;
    }

    fn evict(&mut self) -> Option<FrameId> {
        let (_, victim) = self.cold.pop_first().or_else(|| self.hot.pop_first())?;

        if let Some(node) = self.node_store.remove(&victim) {
            self.tombstones.bury(node);
        }
        trace!(frame_id = victim, "evicted frame");
        Some(victim)
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.check_frame(frame_id);

        match self.node_store.get(&frame_id) {
            Some(node) => assert!(node.is_evictable, "cannot remove non-evictable frame {}", frame_id),
            None => panic!("cannot remove untracked frame {}", frame_id),
        }

        if let Some(node) = self.node_store.remove(&frame_id) {
            Self::unindex(&mut self.cold, &mut self.hot, &node);
            self.tombstones.bury(node);
        }
    }

    fn size(&self) -> usize {
        self.cold.len() + self.hot.len()
    }
}
