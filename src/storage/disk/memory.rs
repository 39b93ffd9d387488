use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{bail, Result};
use parking_lot::Mutex;

use super::manager::{check_page_len, DiskManager};
use crate::storage::page::PageId;

#[derive(Default)]
struct Shared {
    pages: Mutex<HashMap<PageId, Box<[u8]>>>,
    num_reads: AtomicU64,
    num_writes: AtomicU64,
    num_deletes: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// Disk manager backed by a hash map.
///
/// Clones share the same pages, so a test can hand one clone to the buffer
/// pool and keep another to inspect what reached "disk" or to inject faults.
#[derive(Clone, Default)]
pub struct MemoryDiskManager {
    shared: Arc<Shared>,
}

impl MemoryDiskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the stored bytes, `None` if the page was never written.
    pub fn page(&self, page_id: PageId) -> Option<Vec<u8>> {
        self.shared.pages.lock().get(&page_id).map(|data| data.to_vec())
    }

    pub fn num_pages(&self) -> usize {
        self.shared.pages.lock().len()
    }

    pub fn num_reads(&self) -> u64 {
        self.shared.num_reads.load(Ordering::Acquire)
    }

    pub fn num_writes(&self) -> u64 {
        self.shared.num_writes.load(Ordering::Acquire)
    }

    pub fn num_deletes(&self) -> u64 {
        self.shared.num_deletes.load(Ordering::Acquire)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::Release);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Release);
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> Result<()> {
        check_page_len(page_id, page_data.len())?;
        if self.shared.fail_reads.load(Ordering::Acquire) {
            bail!("injected read failure on page {}", page_id);
        }
        self.shared.num_reads.fetch_add(1, Ordering::AcqRel);

        match self.shared.pages.lock().get(&page_id) {
            Some(data) => page_data.copy_from_slice(data),
            None => page_data.fill(0),
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> Result<()> {
        check_page_len(page_id, page_data.len())?;
        if self.shared.fail_writes.load(Ordering::Acquire) {
            bail!("injected write failure on page {}", page_id);
        }
        self.shared.num_writes.fetch_add(1, Ordering::AcqRel);

        self.shared
            .pages
            .lock()
            .insert(page_id, page_data.to_vec().into_boxed_slice());
        Ok(())
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.shared.num_deletes.fetch_add(1, Ordering::AcqRel);
        self.shared.pages.lock().remove(&page_id);
        Ok(())
    }
}
