//! A fixed-size page cache with LRU-K eviction.
//!
//! [`buffer::buffer_pool_manager::BufferPoolManager`] hands out RAII page
//! guards over frames it fills through a [`storage::disk::scheduler::DiskScheduler`].

pub mod buffer;
pub mod storage;
pub mod utils;
pub mod wal;

mod tests;
