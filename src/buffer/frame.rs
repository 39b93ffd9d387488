use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::buffer_pool_manager::FrameId;
use crate::storage::page::{PageId, PAGE_SIZE};

/// Bytes of a frame plus the page they belong to, behind the frame latch.
pub struct FrameData {
    // None while a load is in flight or after it failed.
    pub(crate) page_id: Option<PageId>,
    pub(crate) data: Box<[u8]>,
}

impl FrameData {
    fn new() -> Self {
        FrameData {
            page_id: None,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.page_id = None;
        self.data.fill(0);
    }
}

pub struct FrameHeader {
    pub frame_id: FrameId,
    // Only changed while the pool's structural lock is held.
    pub(crate) pin_count: AtomicUsize,
    pub(crate) is_dirty: AtomicBool,
    pub(crate) latch: RwLock<FrameData>,
}

impl FrameHeader {
    pub(crate) fn new(frame_id: FrameId) -> Self {
        FrameHeader {
            frame_id,
            pin_count: AtomicUsize::new(0),
            is_dirty: AtomicBool::new(false),
            latch: RwLock::new(FrameData::new()),
        }
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn pin(&self) -> usize {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the remaining pin count.
    pub(crate) fn unpin(&self) -> usize {
        let previous = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "frame {} unpinned more often than pinned", self.frame_id);
        previous - 1
    }

    pub(crate) fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag, returning whether it was set.
    pub(crate) fn take_dirty(&self) -> bool {
        self.is_dirty.swap(false, Ordering::AcqRel)
    }
}
