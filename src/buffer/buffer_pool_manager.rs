use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLockWriteGuard};
use tracing::{debug, error, trace};

use super::{
    frame::{FrameData, FrameHeader},
    options::{BufferPoolOptions, ReplacerPolicy},
};
use crate::{
    storage::{
        disk::{
            manager::DiskManager,
            scheduler::{DiskScheduler, IoFuture},
        },
        page::page_guard::{ReadPageGuard, WritePageGuard},
    },
    utils::{
        lru_k_replacer::LRUKReplacer,
        replacer::{AccessType, Replacer, ScanLRUKReplacer},
    },
    wal::Wal,
};

pub type FrameId = usize;
pub use crate::storage::page::PageId;

// Everything guarded by the structural lock. Frame bytes are not in here:
// each frame has its own latch.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    frame_table: HashMap<FrameId, PageId>,
    free_frames: VecDeque<FrameId>,
}

/// Caches pages from a [`DiskManager`] in a fixed set of frames.
///
/// Lock order is structural lock -> replacer lock, and structural lock ->
/// frame latch for unpinned frames only (nobody can be holding those). Frame
/// latches of pinned frames are only ever waited on with the structural lock
/// released, and disk I/O is only ever awaited outside of it.
pub struct BufferPoolManager {
    num_frames: usize,
    next_page_id: AtomicU32,

    frames: Vec<FrameHeader>,
    state: Mutex<PoolState>,

    // Candidate frames for eviction. Never locked before `state`.
    replacer: Mutex<Box<dyn Replacer>>,

    disk_scheduler: DiskScheduler,

    wal: Option<Arc<Wal>>,
}

enum Pinned<'a> {
    Resident(FrameId),
    Loading(Load<'a>),
}

// A frame claimed for `page_id`, latched exclusively, with its I/O queued.
struct Load<'a> {
    frame_id: FrameId,
    page_id: PageId,
    latch: RwLockWriteGuard<'a, FrameData>,
    write_back: Option<IoFuture<()>>,
    read: IoFuture<Box<[u8]>>,
}

impl BufferPoolManager {
    pub fn new<M: DiskManager>(
        num_frames: usize,
        disk_manager: M,
        k_dist: usize,
        wal: Option<Arc<Wal>>,
    ) -> Self {
        let options = BufferPoolOptions::default()
            .num_frames(num_frames)
            .k_dist(k_dist);
        Self::with_options(options, disk_manager, wal)
    }

    pub fn with_options<M: DiskManager>(
        options: BufferPoolOptions,
        disk_manager: M,
        wal: Option<Arc<Wal>>,
    ) -> Self {
        let num_frames = options.num_frames;
        let tombstone_capacity = options.effective_tombstone_capacity();

        let replacer: Box<dyn Replacer> = match options.replacer {
            ReplacerPolicy::Indexed => Box::new(LRUKReplacer::with_tombstones(
                num_frames,
                options.k_dist,
                tombstone_capacity,
            )),
            ReplacerPolicy::Scan => Box::new(ScanLRUKReplacer::with_tombstones(
                num_frames,
                options.k_dist,
                tombstone_capacity,
            )),
        };

        // The maximum amount of frames are all allocated at once
        let frames = (0..num_frames).map(FrameHeader::new).collect();

        debug!(num_frames, k_dist = options.k_dist, policy = ?options.replacer, "buffer pool created");

        Self {
            num_frames,
            next_page_id: AtomicU32::new(0),
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(num_frames),
                frame_table: HashMap::with_capacity(num_frames),
                free_frames: (0..num_frames).collect(),
            }),
            replacer: Mutex::new(replacer),
            disk_scheduler: DiskScheduler::new(disk_manager),
            wal,
        }
    }

    /// Number of frames in the pool.
    pub fn size(&self) -> usize {
        self.num_frames
    }

    pub fn wal(&self) -> Option<&Arc<Wal>> {
        self.wal.as_ref()
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_frames.len()
    }

    /// Frames the replacer may currently evict.
    pub fn evictable_count(&self) -> usize {
        self.replacer.lock().size()
    }

    /// Hands out a fresh page id. Nothing is read or written until the page
    /// is first accessed; a page that was never written reads as zeros.
    pub fn new_page(&self) -> PageId {
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        trace!(page_id, "allocated page id");
        page_id
    }

    /// Drops `page_id` from the pool and releases its disk slot.
    ///
    /// Returns `Ok(false)` without touching anything if the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            if frame.pin_count() > 0 {
                debug!(page_id, frame_id, "refusing to delete pinned page");
                return Ok(false);
            }

            state.page_table.remove(&page_id);
            state.frame_table.remove(&frame_id);
            self.replacer.lock().remove(frame_id);

            frame.take_dirty();
            self.latch_unpinned(frame_id).reset();
            state.free_frames.push_back(frame_id);
            debug!(page_id, frame_id, "deleted resident page");
        }

        // Queued under the lock so it lands after any write-back of this page.
        let deallocation = self.disk_scheduler.schedule_deallocate(page_id);
        drop(state);

        deallocation
            .wait()
            .with_context(|| format!("failed to deallocate page {}", page_id))?;
        Ok(true)
    }

    /// Pins `page_id` and latches it shared.
    ///
    /// `Ok(None)` means every frame is pinned. Disk failures come back as
    /// `Err`, and the page is left non-resident.
    pub fn checked_read_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<Option<ReadPageGuard<'_>>> {
        loop {
            match self.pin_page(page_id, access_type) {
                None => return Ok(None),
                Some(Pinned::Resident(frame_id)) => {
                    let latch = self.frames[frame_id].latch.read();
                    if latch.page_id == Some(page_id) {
                        return Ok(Some(ReadPageGuard::new(self, frame_id, page_id, latch)));
                    }
                    // Someone else's load of this page failed under us.
                    drop(latch);
                    self.unpin_frame(frame_id);
                }
                Some(Pinned::Loading(load)) => {
                    let frame_id = load.frame_id;
                    let latch = self.finish_load(load)?;
                    let latch = RwLockWriteGuard::downgrade(latch);
                    return Ok(Some(ReadPageGuard::new(self, frame_id, page_id, latch)));
                }
            }
        }
    }

    /// Pins `page_id` and latches it exclusively. Same outcomes as
    /// [`checked_read_page`](Self::checked_read_page).
    pub fn checked_write_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<Option<WritePageGuard<'_>>> {
        loop {
            match self.pin_page(page_id, access_type) {
                None => return Ok(None),
                Some(Pinned::Resident(frame_id)) => {
                    let latch = self.frames[frame_id].latch.write();
                    if latch.page_id == Some(page_id) {
                        return Ok(Some(WritePageGuard::new(self, frame_id, page_id, latch)));
                    }
                    drop(latch);
                    self.unpin_frame(frame_id);
                }
                Some(Pinned::Loading(load)) => {
                    let frame_id = load.frame_id;
                    let latch = self.finish_load(load)?;
                    return Ok(Some(WritePageGuard::new(self, frame_id, page_id, latch)));
                }
            }
        }
    }

    /// Like [`checked_read_page`](Self::checked_read_page), but running out
    /// of frames or failing I/O is a bug in the caller.
    pub fn read_page(&self, page_id: PageId, access_type: AccessType) -> ReadPageGuard<'_> {
        match self.checked_read_page(page_id, access_type) {
            Ok(Some(guard)) => guard,
            Ok(None) => panic!("no frame available to read page {}", page_id),
            Err(err) => panic!("failed to read page {}: {:#}", page_id, err),
        }
    }

    pub fn write_page(&self, page_id: PageId, access_type: AccessType) -> WritePageGuard<'_> {
        match self.checked_write_page(page_id, access_type) {
            Ok(Some(guard)) => guard,
            Ok(None) => panic!("no frame available to write page {}", page_id),
            Err(err) => panic!("failed to write page {}: {:#}", page_id, err),
        }
    }

    /// Writes the page to disk if resident and clears its dirty flag.
    ///
    /// The caller must not hold a write guard on `page_id`.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let Some(frame_id) = self.pin_resident(page_id) else {
            return Ok(());
        };

        let result = self.flush_frame(frame_id, page_id);
        self.unpin_frame(frame_id);
        result
    }

    /// Flushes every resident page, dirty or not. Keeps going past failures
    /// and reports the first one.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<PageId> = self.state.lock().page_table.keys().copied().collect();

        let mut first_err = None;
        for page_id in resident {
            if let Err(err) = self.flush_page(page_id) {
                error!(page_id, ?err, "flush failed");
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<usize> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id].pin_count())
    }

    /// Drops one pin on `frame_id`. Called by guards after they released the
    /// frame latch.
    pub(crate) fn unpin_frame(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        self.release_pin(&mut state, frame_id);
    }

    pub(crate) fn frame(&self, frame_id: FrameId) -> &FrameHeader {
        &self.frames[frame_id]
    }

    fn release_pin(&self, state: &mut PoolState, frame_id: FrameId) {
        if self.frames[frame_id].unpin() > 0 {
            return;
        }

        let mut replacer = self.replacer.lock();
        replacer.set_evictable(frame_id, true);

        // Orphaned by a failed load: hand the frame back.
        if !state.frame_table.contains_key(&frame_id) {
            replacer.remove(frame_id);
            state.free_frames.push_back(frame_id);
            trace!(frame_id, "returned orphaned frame to free list");
        }
    }

    fn touch(&self, frame_id: FrameId, access_type: AccessType) {
        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id, access_type);
        replacer.set_evictable(frame_id, false);
    }

    fn latch_unpinned(&self, frame_id: FrameId) -> RwLockWriteGuard<'_, FrameData> {
        // Guards release the latch before their pin, so an unpinned frame's
        // latch is free and this cannot block while the structural lock is held.
        self.frames[frame_id]
            .latch
            .try_write()
            .unwrap_or_else(|| panic!("frame {} is latched but not pinned", frame_id))
    }

    /// Pins the frame holding `page_id`, claiming and queueing a load for a
    /// frame if the page is not resident. `None` if no frame can be had.
    fn pin_page(&self, page_id: PageId, access_type: AccessType) -> Option<Pinned<'_>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.frames[frame_id].pin();
            self.touch(frame_id, access_type);
            trace!(page_id, frame_id, "buffer pool hit");
            return Some(Pinned::Resident(frame_id));
        }

        let frame_id = match state.free_frames.pop_front() {
            Some(frame_id) => frame_id,
            None => {
                let victim = self.replacer.lock().evict();
                match victim {
                    Some(frame_id) => frame_id,
                    None => {
                        debug!(page_id, "no free or evictable frame");
                        return None;
                    }
                }
            }
        };

        let frame = &self.frames[frame_id];
        let mut latch = self.latch_unpinned(frame_id);

        let mut write_back = None;
        if let Some(old_page_id) = state.frame_table.remove(&frame_id) {
            state.page_table.remove(&old_page_id);
            if frame.take_dirty() {
                write_back = Some(
                    self.disk_scheduler
                        .schedule_write(old_page_id, latch.data.clone()),
                );
            }
            debug!(
                frame_id,
                old_page_id,
                page_id,
                dirty = write_back.is_some(),
                "evicted page"
            );
        }

        latch.page_id = None;
        let read = self.disk_scheduler.schedule_read(page_id);

        state.page_table.insert(page_id, frame_id);
        state.frame_table.insert(frame_id, page_id);
        frame.pin();
        self.touch(frame_id, access_type);
        debug!(page_id, frame_id, "buffer pool miss, loading page");

        Some(Pinned::Loading(Load {
            frame_id,
            page_id,
            latch,
            write_back,
            read,
        }))
    }

    /// Waits for the queued I/O of a claimed frame. On failure the page is
    /// unmapped and the loader's pin is dropped. If the victim's write-back
    /// failed, the victim is mapped back onto the frame, still dirty;
    /// otherwise the frame is wiped.
    fn finish_load<'a>(&'a self, load: Load<'a>) -> Result<RwLockWriteGuard<'a, FrameData>> {
        let Load {
            frame_id,
            page_id,
            mut latch,
            write_back,
            read,
        } = load;

        let old_page_id = write_back.as_ref().map(IoFuture::page_id);
        let written = match write_back {
            Some(io) => {
                let victim = io.page_id();
                io.wait().with_context(|| {
                    format!("failed to write back page {} from frame {}", victim, frame_id)
                })
            }
            None => Ok(()),
        };
        let write_back_failed = written.is_err();
        let fetched = read
            .wait()
            .with_context(|| format!("failed to read page {} into frame {}", page_id, frame_id));

        match written.and(fetched) {
            Ok(bytes) => {
                latch.data.copy_from_slice(&bytes);
                latch.page_id = Some(page_id);
                Ok(latch)
            }
            Err(err) => {
                error!(page_id, frame_id, ?err, "page load failed");

                // Structural lock holders never wait on a pinned frame's latch.
                let mut state = self.state.lock();
                if state.page_table.get(&page_id) == Some(&frame_id) {
                    state.page_table.remove(&page_id);
                    state.frame_table.remove(&frame_id);
                }

                match old_page_id {
                    // The frame still holds the only copy of the victim.
                    Some(old_page_id)
                        if write_back_failed && !state.page_table.contains_key(&old_page_id) =>
                    {
                        latch.page_id = Some(old_page_id);
                        state.page_table.insert(old_page_id, frame_id);
                        state.frame_table.insert(frame_id, old_page_id);
                        self.frames[frame_id].mark_dirty();
                        debug!(old_page_id, frame_id, "restored dirty page after failed write-back");
                    }
                    Some(old_page_id) if write_back_failed => {
                        error!(old_page_id, frame_id, "dirty page reloaded elsewhere, changes lost");
                        latch.reset();
                    }
                    _ => latch.reset(),
                }
                drop(latch);

                self.release_pin(&mut state, frame_id);
                Err(err)
            }
        }
    }

    fn pin_resident(&self, page_id: PageId) -> Option<FrameId> {
        let state = self.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        self.frames[frame_id].pin();
        self.replacer.lock().set_evictable(frame_id, false);
        Some(frame_id)
    }

    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id];
        let latch = frame.latch.read();
        if latch.page_id != Some(page_id) {
            return Ok(());
        }

        let was_dirty = frame.take_dirty();
        let result = self
            .disk_scheduler
            .schedule_write(page_id, latch.data.clone())
            .wait()
            .with_context(|| format!("failed to flush page {}", page_id));

        match &result {
            Ok(()) => debug!(page_id, frame_id, was_dirty, "flushed page"),
            Err(_) if was_dirty => frame.mark_dirty(),
            Err(_) => {}
        }
        result
    }
}
