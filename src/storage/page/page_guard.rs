use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::{
    buffer::{
        buffer_pool_manager::{BufferPoolManager, FrameId},
        frame::FrameData,
    },
    storage::page::PageId,
};

/// Shared access to a pinned page.
///
/// Dropping the guard releases the frame latch first and the pin second, so
/// a frame is never evictable while somebody still holds its latch.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    latch: Option<RwLockReadGuard<'a, FrameData>>,
}

impl<'a> ReadPageGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        latch: RwLockReadGuard<'a, FrameData>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn is_dirty(&self) -> bool {
        self.bpm.frame(self.frame_id).is_dirty()
    }

    pub fn data(&self) -> &[u8] {
        match &self.latch {
            Some(latch) => &latch.data,
            None => unreachable!("read guard used after release"),
        }
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        drop(self.latch.take());
        self.bpm.unpin_frame(self.frame_id);
    }
}

/// Exclusive access to a pinned page. The page is marked dirty when the
/// guard is dropped.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    latch: Option<RwLockWriteGuard<'a, FrameData>>,
}

impl<'a> WritePageGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        latch: RwLockWriteGuard<'a, FrameData>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn is_dirty(&self) -> bool {
        self.bpm.frame(self.frame_id).is_dirty()
    }

    pub fn data(&self) -> &[u8] {
        match &self.latch {
            Some(latch) => &latch.data,
            None => unreachable!("write guard used after release"),
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.bpm.frame(self.frame_id).mark_dirty();
        match &mut self.latch {
            Some(latch) => &mut latch.data,
            None => unreachable!("write guard used after release"),
        }
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        // Set while still latched so a concurrent flush cannot miss it.
        self.bpm.frame(self.frame_id).mark_dirty();
        drop(self.latch.take());
        self.bpm.unpin_frame(self.frame_id);
    }
}
