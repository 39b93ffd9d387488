/// Default history depth of the LRU-K replacer.
pub const LRUK_REPLACER_K: usize = 10;

pub const DEFAULT_NUM_FRAMES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacerPolicy {
    /// Ordered cold/hot sets, O(log n) eviction.
    #[default]
    Indexed,
    /// Rescans every tracked frame on eviction.
    Scan,
}

#[derive(Debug, Clone)]
pub struct BufferPoolOptions {
    pub num_frames: usize,
    pub k_dist: usize,
    // Evicted histories remembered by the replacer. `None` follows `num_frames`.
    pub tombstone_capacity: Option<usize>,
    pub replacer: ReplacerPolicy,
}

impl Default for BufferPoolOptions {
    fn default() -> Self {
        BufferPoolOptions {
            num_frames: DEFAULT_NUM_FRAMES,
            k_dist: LRUK_REPLACER_K,
            tombstone_capacity: None,
            replacer: ReplacerPolicy::default(),
        }
    }
}

impl BufferPoolOptions {
    /// Sets the frame count. The tombstone capacity follows it unless it was
    /// set explicitly.
    pub fn num_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn k_dist(mut self, k_dist: usize) -> Self {
        self.k_dist = k_dist;
        self
    }

    pub fn tombstone_capacity(mut self, tombstone_capacity: usize) -> Self {
        self.tombstone_capacity = Some(tombstone_capacity);
        self
    }

    pub fn effective_tombstone_capacity(&self) -> usize {
        self.tombstone_capacity.unwrap_or(self.num_frames)
    }

    pub fn replacer(mut self, replacer: ReplacerPolicy) -> Self {
        self.replacer = replacer;
        self
    }
}
