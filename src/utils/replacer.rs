use std::collections::{HashMap, VecDeque};

use hashlink::LinkedHashMap;
use tracing::trace;

use crate::buffer::buffer_pool_manager::FrameId;

/// Hint describing why a frame is being touched. Recorded alongside each
/// access; the LRU-K ordering itself does not depend on it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

pub trait Replacer: Send {
    /// Records an access to `frame_id` at the current timestamp, creating a
    /// tracking node on first sight.
    fn record_access(&mut self, frame_id: FrameId, access_type: AccessType);

    /// Toggles whether `frame_id` may be chosen by `evict`. Untracked frames
    /// are ignored.
    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool);

    /// Picks the evictable frame with the largest backward k-distance and
    /// stops tracking it.
    fn evict(&mut self) -> Option<FrameId>;

    /// Stops tracking an evictable frame without going through `evict`.
    ///
    /// Panics when the frame is untracked or pinned.
    fn remove(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}

#[derive(Debug)]
pub(crate) struct LRUKNode {
    // Oldest access at the front, at most `k` entries.
    pub(crate) history: VecDeque<u64>,
    pub(crate) is_evictable: bool,
    pub(crate) frame_id: FrameId,
    k: usize,
}

impl LRUKNode {
    pub(crate) fn new(frame_id: FrameId, k: usize) -> Self {
        LRUKNode {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
            frame_id,
            k,
        }
    }

    pub(crate) fn push_timestamp(&mut self, timestamp: u64) {
        self.history.push_back(timestamp);
        if self.history.len() > self.k {
            self.history.pop_front();
        }
    }

    /// A node with fewer than `k` accesses has an infinite backward k-distance.
    pub(crate) fn has_full_history(&self) -> bool {
        self.history.len() >= self.k
    }

    /// The earliest retained access. Once the history is full this is the
    /// k-th most recent access.
    pub(crate) fn earliest_timestamp(&self) -> u64 {
        self.history.front().copied().unwrap_or(0)
    }

    /// `None` stands for +inf.
    pub(crate) fn backward_k_distance(&self, now: u64) -> Option<u64> {
        if self.has_full_history() {
            Some(now - self.earliest_timestamp())
        } else {
            None
        }
    }
}

/// Recently evicted nodes, oldest first. Bounded; purges from the front.
pub(crate) struct Tombstones {
    nodes: LinkedHashMap<FrameId, LRUKNode>,
    capacity: usize,
}

impl Tombstones {
    pub(crate) fn new(capacity: usize) -> Self {
        Tombstones {
            nodes: LinkedHashMap::new(),
            capacity,
        }
    }

    pub(crate) fn bury(&mut self, mut node: LRUKNode) {
        if self.capacity == 0 {
            return;
        }
        node.is_evictable = false;
        self.nodes.insert(node.frame_id, node);

        while self.nodes.len() > self.capacity {
            if let Some((frame_id, _)) = self.nodes.pop_front() {
                trace!(frame_id, "purged tombstone");
            }
        }
    }

    /// Hands back the buried node for `frame_id` with its history cleared, so
    /// a recycled frame always starts cold.
    pub(crate) fn recover(&mut self, frame_id: FrameId) -> Option<LRUKNode> {
        let mut node = self.nodes.remove(&frame_id)?;
        node.history.clear();
        trace!(frame_id, "recovered tombstone");
        Some(node)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn contains(&self, frame_id: FrameId) -> bool {
        self.nodes.contains_key(&frame_id)
    }
}

/// LRU-K replacer that rescans every tracked node on each eviction.
///
/// Kept as the reference implementation: simple enough to trust, and the
/// indexed [`LRUKReplacer`](super::lru_k_replacer::LRUKReplacer) is checked
/// against it.
pub struct ScanLRUKReplacer {
    node_store: HashMap<FrameId, LRUKNode>,
    tombstones: Tombstones,
    current_timestamp: u64,
    evictable_size: usize,
    replacer_size: usize,
    k: usize,
}

impl ScanLRUKReplacer {
    pub fn new(number_of_frames: usize, k: usize) -> Self {
        Self::with_tombstones(number_of_frames, k, number_of_frames)
    }

    pub fn with_tombstones(number_of_frames: usize, k: usize, tombstone_capacity: usize) -> Self {
        assert!(k > 0, "k must be at least 1");
        ScanLRUKReplacer {
            node_store: HashMap::with_capacity(number_of_frames),
            tombstones: Tombstones::new(tombstone_capacity),
            current_timestamp: 0,
            evictable_size: 0,
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

    #[cfg(test)]
    pub(crate) fn history_len(&self, frame_id: FrameId) -> Option<usize> {
        self.node_store.get(&frame_id).map(|node| node.history.len())
    }
}

impl Replacer for ScanLRUKReplacer {
    fn record_access(&mut self, frame_id: FrameId, _access_type: AccessType) {
        self.check_frame(frame_id);

        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;

        let k = self.k;
        let tombstones = &mut self.tombstones;
        self.node_store
            .entry(frame_id)
            .or_insert_with(|| {
                tombstones
                    .recover(frame_id)
                    .unwrap_or_else(|| LRUKNode::new(frame_id, k))
            })
            .push_timestamp(timestamp);
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        self.check_frame(frame_id);

        let Some(node) = self.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable != evictable {
            if evictable {
                self.evictable_size += 1;
            } else {
                self.evictable_size -= 1;
            }
            node.is_evictable = evictable;
        }
        self.current_timestamp += 1;
    }

    fn evict(&mut self) -> Option<FrameId> {
        if self.evictable_size == 0 {
            return None;
        }

        let now = self.current_timestamp;

        // (+inf first, then larger distance, then earlier timestamp)
        let victim = self
            .node_store
            .values()
            .filter(|node| node.is_evictable)
            .min_by(|a, b| {
                match (a.backward_k_distance(now), b.backward_k_distance(now)) {
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(da), Some(db)) => db.cmp(&da),
                    (None, None) => std::cmp::Ordering::Equal,
                }
                .then(a.earliest_timestamp().cmp(&b.earliest_timestamp()))
            })
            .map(|node| node.frame_id)?;

        if let Some(node) = self.node_store.remove(&victim) {
            self.tombstones.bury(node);
        }
        self.evictable_size -= 1;
        trace!(frame_id = victim, "scan replacer evicted frame");
        Some(victim)
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.check_frame(frame_id);

        match self.node_store.get(&frame_id) {
            Some(node) => assert!(node.is_evictable, "cannot remove non-evictable frame {}", frame_id),
            None => panic!("cannot remove untracked frame {}", frame_id),
        }

        if let Some(node) = self.node_store.remove(&frame_id) {
            self.evictable_size -= 1;
            self.tombstones.bury(node);
        }
    }

    fn size(&self) -> usize {
        self.evictable_size
    }
}

#[cfg(test)]
pub mod test {
    use super::{AccessType, Replacer, ScanLRUKReplacer};

    #[test]
    fn replacer_test() {
        let mut replacer = ScanLRUKReplacer::new(7, 2);

        // Frames [1, 2, 3, 4, 5] evictable, frame 6 pinned.
        for frame_id in 1..=6 {
            replacer.record_access(frame_id, AccessType::Unknown);
        }
        for frame_id in 1..=5 {
            replacer.set_evictable(frame_id, true);
        }
        replacer.set_evictable(6, false);
        assert_eq!(5, replacer.size());

        // Frame 1 now has two accesses; everyone else is still at +inf.
        replacer.record_access(1, AccessType::Unknown);
        assert_eq!(Some(2), replacer.history_len(1));

        // Ties at +inf break on the oldest access, so [2, 3, 4, 5, 1].
        assert_eq!(Some(2), replacer.evict());
        assert_eq!(Some(3), replacer.evict());
        assert_eq!(Some(4), replacer.evict());
        assert_eq!(2, replacer.size());

        // Replacer holds [5, 1]. Bring back [3, 4] and touch 5: ordering is [3, 1, 5, 4].
        replacer.record_access(3, AccessType::Unknown);
        replacer.record_access(4, AccessType::Unknown);
        replacer.record_access(5, AccessType::Unknown);
        replacer.record_access(4, AccessType::Unknown);
        replacer.set_evictable(3, true);
        replacer.set_evictable(4, true);
        assert_eq!(4, replacer.size());

        assert_eq!(Some(3), replacer.evict());
        assert_eq!(3, replacer.size());

        // Pin 1, leaving [5, 4].
        replacer.set_evictable(1, false);
        assert_eq!(2, replacer.size());
        assert_eq!(Some(5), replacer.evict());
        assert_eq!(1, replacer.size());

        // Touch 1 twice and release it: [4, 1].
        replacer.record_access(1, AccessType::Unknown);
        replacer.record_access(1, AccessType::Unknown);
        replacer.set_evictable(1, true);
        assert_eq!(2, replacer.size());

        assert_eq!(Some(4), replacer.evict());
        assert_eq!(1, replacer.size());
        assert_eq!(Some(1), replacer.evict());
        assert_eq!(0, replacer.size());

        // Frame 1 comes back pinned.
        replacer.record_access(1, AccessType::Unknown);
        replacer.set_evictable(1, false);
        assert_eq!(0, replacer.size());

        // A failed eviction leaves the size alone.
        assert_eq!(None, replacer.evict());
        assert_eq!(0, replacer.size());

        replacer.set_evictable(1, true);
        assert_eq!(1, replacer.size());
        assert_eq!(Some(1), replacer.evict());
        assert_eq!(0, replacer.size());

        assert_eq!(None, replacer.evict());
        assert_eq!(0, replacer.size());

        // Frame 0 was never accessed, so it is ignored.
        replacer.set_evictable(0, true);
        assert_eq!(0, replacer.size());
        assert_eq!(None, replacer.evict());

        // Frame 6 has been tracked, pinned, all along.
        replacer.set_evictable(6, true);
        assert_eq!(1, replacer.size());
        assert_eq!(Some(6), replacer.evict());
        assert_eq!(0, replacer.size());
    }

    #[test]
    fn tombstone_recovery_starts_cold() {
        let mut replacer = ScanLRUKReplacer::new(4, 2);

        replacer.record_access(0, AccessType::Lookup);
        replacer.record_access(0, AccessType::Lookup);
        replacer.set_evictable(0, true);
        assert_eq!(Some(0), replacer.evict());
        assert!(replacer.is_tombstoned(0));

        replacer.record_access(0, AccessType::Lookup);
        assert!(!replacer.is_tombstoned(0));
        assert_eq!(Some(1), replacer.history_len(0));
    }

    #[test]
    fn tombstones_are_bounded() {
        let mut replacer = ScanLRUKReplacer::with_tombstones(4, 2, 2);

        for frame_id in 0..4 {
            replacer.record_access(frame_id, AccessType::Unknown);
            replacer.set_evictable(frame_id, true);
        }
        for _ in 0..4 {
            replacer.evict();
        }

        assert_eq!(2, replacer.tombstone_count());
        assert!(!replacer.is_tombstoned(0));
        assert!(!replacer.is_tombstoned(1));
        assert!(replacer.is_tombstoned(2));
        assert!(replacer.is_tombstoned(3));
    }

    #[test]
    #[should_panic]
    fn remove_pinned_frame_panics() {
        let mut replacer = ScanLRUKReplacer::new(4, 2);
        replacer.record_access(0, AccessType::Unknown);
        replacer.remove(0);
    }

    #[test]
    #[should_panic]
    fn out_of_range_frame_panics() {
        let mut replacer = ScanLRUKReplacer::new(4, 2);
        replacer.record_access(4, AccessType::Unknown);
    }
}
