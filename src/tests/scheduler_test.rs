#[cfg(test)]
pub mod test {
    use tempfile::tempdir;

    use crate::storage::{
        disk::{manager::FileDiskManager, memory::MemoryDiskManager, scheduler::DiskScheduler},
        page::PAGE_SIZE,
    };

    fn page_of(byte: u8) -> Box<[u8]> {
        vec![byte; PAGE_SIZE].into_boxed_slice()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduler_test() {
        let dir = tempdir().unwrap();
        let manager = FileDiskManager::create(dir.path().join("geode.db")).unwrap();
        let scheduler = DiskScheduler::new(manager);

        // Write then read, queued back to back
        let write = scheduler.schedule_write(0, page_of(1));
        let read = scheduler.schedule_read(0);

        write.await.unwrap();
        let data = read.await.unwrap();
        assert_eq!(&*data, &*page_of(1), "Page read mismatch!");
    }

    #[test]
    fn requests_complete_in_schedule_order() {
        let disk = MemoryDiskManager::new();
        let scheduler = DiskScheduler::new(disk.clone());

        // Nothing is awaited until everything is queued.
        let first = scheduler.schedule_write(7, page_of(1));
        let second = scheduler.schedule_write(7, page_of(2));
        let read = scheduler.schedule_read(7);
        let dealloc = scheduler.schedule_deallocate(7);
        let after = scheduler.schedule_read(7);

        first.wait().unwrap();
        second.wait().unwrap();
        assert_eq!(&*read.wait().unwrap(), &*page_of(2));
        dealloc.wait().unwrap();
        assert!(after.wait().unwrap().iter().all(|&b| b == 0));

        assert_eq!(2, disk.num_writes());
        assert_eq!(1, disk.num_deletes());
        assert_eq!(None, disk.page(7));
    }

    #[test]
    fn failures_reach_the_caller() {
        let disk = MemoryDiskManager::new();
        let scheduler = DiskScheduler::new(disk.clone());

        disk.fail_writes(true);
        let write = scheduler.schedule_write(1, page_of(9));
        assert_eq!(1, write.page_id());
        assert!(write.wait().is_err());

        disk.fail_writes(false);
        disk.fail_reads(true);
        assert!(scheduler.schedule_read(1).wait().is_err());

        disk.fail_reads(false);
        assert!(scheduler.schedule_read(1).wait().is_ok());
    }

    #[test]
    fn short_write_is_rejected() {
        let scheduler = DiskScheduler::new(MemoryDiskManager::new());
        let io = scheduler.schedule_write(0, vec![0u8; 16].into_boxed_slice());
        assert!(io.wait().is_err());
    }

    #[test]
    fn drop_drains_queued_requests() {
        let disk = MemoryDiskManager::new();
        let scheduler = DiskScheduler::new(disk.clone());
        let pending: Vec<_> = (0..32).map(|p| scheduler.schedule_write(p, page_of(p as u8))).collect();
        drop(scheduler);

        for io in pending {
            io.wait().unwrap();
        }
        assert_eq!(32, disk.num_pages());
    }
}
