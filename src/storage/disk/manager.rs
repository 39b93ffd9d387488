use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use hashlink::LinkedHashMap;
use tracing::trace;

use crate::storage::page::{PageId, PAGE_SIZE};

/// Page-granular storage underneath the disk scheduler.
///
/// Buffers handed to these calls are always exactly `PAGE_SIZE` bytes.
pub trait DiskManager: Send + 'static {
    /// Fills `page_data` with the page. A page that was never written reads
    /// back as zeros.
    fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> Result<()>;

    fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> Result<()>;

    /// Releases the storage slot backing `page_id`.
    fn deallocate_page(&mut self, page_id: PageId) -> Result<()>;
}

pub(crate) fn check_page_len(page_id: PageId, len: usize) -> Result<()> {
    if len != PAGE_SIZE {
        bail!(
            "page {} buffer is {} bytes, expected {}",
            page_id,
            len,
            PAGE_SIZE
        );
    }
    Ok(())
}

/// Single database file. Pages receive a `PAGE_SIZE` aligned slot on their
/// first write; slots of deallocated pages are handed out again before the
/// file grows.
pub struct FileDiskManager {
    db_io: File,
    db_path: PathBuf,

    // page id -> byte offset in the db file
    pages: LinkedHashMap<PageId, u64>,
    free_slots: VecDeque<u64>,
    next_slot: u64,

    num_reads: u64,
    num_writes: u64,
    num_deletes: u64,
}

impl FileDiskManager {
    /// Creates (or truncates) the database file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&db_path)
            .with_context(|| format!("failed to create db file {}", db_path.display()))?;

        Ok(FileDiskManager {
            db_io,
            db_path,
            pages: LinkedHashMap::new(),
            free_slots: VecDeque::new(),
            next_slot: 0,
            num_reads: 0,
            num_writes: 0,
            num_deletes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes
    }

    pub fn num_deletes(&self) -> u64 {
        self.num_deletes
    }

    /// Number of slots the file has grown to, live or free.
    pub fn num_slots(&self) -> u64 {
        self.next_slot
    }

    fn allocate_slot(&mut self, page_id: PageId) -> u64 {
        let offset = match self.free_slots.pop_front() {
            Some(offset) => offset,
            None => {
                let offset = self.next_slot * PAGE_SIZE as u64;
                self.next_slot += 1;
                offset
            }
        };
        trace!(page_id, offset, "allocated disk slot");
        self.pages.insert(page_id, offset);
        offset
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> Result<()> {
        check_page_len(page_id, page_data.len())?;
        self.num_reads += 1;

        let Some(&offset) = self.pages.get(&page_id) else {
            page_data.fill(0);
            return Ok(());
        };

        self.db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {}", page_id))?;
        self.db_io
            .read_exact(page_data)
            .with_context(|| format!("I/O error while reading page {}", page_id))?;
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> Result<()> {
        check_page_len(page_id, page_data.len())?;

        let offset = match self.pages.get(&page_id) {
            Some(&offset) => offset,
            None => self.allocate_slot(page_id),
        };

        self.db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {}", page_id))?;
        self.db_io
            .write_all(page_data)
            .with_context(|| format!("I/O error while writing page {}", page_id))?;
        self.db_io
            .flush()
            .with_context(|| format!("error flushing page {}", page_id))?;

        self.num_writes += 1;
        Ok(())
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.num_deletes += 1;
        if let Some(offset) = self.pages.remove(&page_id) {
            self.free_slots.push_back(offset);
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use super::{DiskManager, FileDiskManager};
    use crate::storage::page::PAGE_SIZE;

    #[test]
    fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = FileDiskManager::create(dir.path().join("geode.db")).unwrap();

        let data = [7u8; PAGE_SIZE];
        manager.write_page(3, &data).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        manager.read_page(3, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(1, manager.num_writes());
        assert_eq!(1, manager.num_slots());
    }

    #[test]
    fn unwritten_page_reads_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = FileDiskManager::create(dir.path().join("geode.db")).unwrap();

        let mut buf = [9u8; PAGE_SIZE];
        manager.read_page(42, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn deallocated_slot_is_recycled() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = FileDiskManager::create(dir.path().join("geode.db")).unwrap();

        manager.write_page(0, &[1u8; PAGE_SIZE]).unwrap();
        manager.write_page(1, &[2u8; PAGE_SIZE]).unwrap();
        manager.deallocate_page(0).unwrap();
        manager.write_page(2, &[3u8; PAGE_SIZE]).unwrap();

        assert_eq!(2, manager.num_slots());

        let mut buf = [0u8; PAGE_SIZE];
        manager.read_page(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        manager.read_page(2, &mut buf).unwrap();
        assert_eq!(buf, [3u8; PAGE_SIZE]);
    }

    #[test]
    fn rejects_short_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = FileDiskManager::create(dir.path().join("geode.db")).unwrap();
        assert!(manager.write_page(0, &[0u8; 16]).is_err());
    }
}
