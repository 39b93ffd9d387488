#[cfg(test)]
pub mod test {
    use std::{sync::mpsc, thread, time::Duration};

    use crate::{
        buffer::buffer_pool_manager::BufferPoolManager,
        storage::disk::memory::MemoryDiskManager, utils::replacer::AccessType,
    };

    #[test]
    fn page_guard_test() {
        let bpm = BufferPoolManager::new(5, MemoryDiskManager::new(), 2, None);
        let pid = bpm.new_page();

        let guard = bpm.read_page(pid, AccessType::Unknown);
        assert_eq!(Some(1), bpm.get_pin_count(pid));
        assert!(!guard.is_dirty());
        drop(guard);
        assert_eq!(Some(0), bpm.get_pin_count(pid));

        let mut guard = bpm.write_page(pid, AccessType::Unknown);
        assert!(!guard.is_dirty());
        guard.data_mut()[0] = 42;
        assert!(guard.is_dirty());
        assert_eq!(42, guard.data()[0]);
        drop(guard);

        let guard = bpm.read_page(pid, AccessType::Unknown);
        assert_eq!(42, guard.data()[0]);
        assert!(guard.is_dirty());
    }

    #[test]
    fn write_guard_marks_dirty_on_drop() {
        let bpm = BufferPoolManager::new(2, MemoryDiskManager::new(), 2, None);
        let pid = bpm.new_page();

        drop(bpm.write_page(pid, AccessType::Unknown));
        assert!(bpm.read_page(pid, AccessType::Unknown).is_dirty());
    }

    #[test]
    fn readers_share_writers_exclude() {
        let bpm = BufferPoolManager::new(4, MemoryDiskManager::new(), 2, None);
        let pid = bpm.new_page();

        // Two readers at once on different threads.
        thread::scope(|s| {
            let first = bpm.read_page(pid, AccessType::Unknown);
            s.spawn(|| {
                let second = bpm.read_page(pid, AccessType::Unknown);
                assert_eq!(0, second.data()[0]);
            })
            .join()
            .unwrap();
            drop(first);
        });

        // A writer blocks until the reader lets go.
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let bpm = &bpm;
            let reader = bpm.read_page(pid, AccessType::Unknown);
            let writer = s.spawn(move || {
                let mut guard = bpm.write_page(pid, AccessType::Unknown);
                guard.data_mut()[0] = 7;
                tx.send(()).unwrap();
            });

            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            assert_eq!(0, reader.data()[0]);
            drop(reader);

            rx.recv().unwrap();
            writer.join().unwrap();
        });

        assert_eq!(7, bpm.read_page(pid, AccessType::Unknown).data()[0]);
        assert_eq!(Some(0), bpm.get_pin_count(pid));
    }

    #[test]
    fn guards_on_distinct_pages() {
        let bpm = BufferPoolManager::new(3, MemoryDiskManager::new(), 2, None);
        let pids: Vec<_> = (0..3).map(|_| bpm.new_page()).collect();

        let mut guards: Vec<_> = pids
            .iter()
            .map(|&pid| bpm.write_page(pid, AccessType::Unknown))
            .collect();
        for (i, guard) in guards.iter_mut().enumerate() {
            assert_eq!(pids[i], guard.page_id());
            guard.data_mut().fill(i as u8 + 1);
        }
        assert_eq!(0, bpm.evictable_count());
        drop(guards);
        assert_eq!(3, bpm.evictable_count());

        for (i, &pid) in pids.iter().enumerate() {
            let guard = bpm.read_page(pid, AccessType::Unknown);
            assert!(guard.data().iter().all(|&b| b == i as u8 + 1));
        }
    }
}
