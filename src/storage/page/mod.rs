pub mod page_guard;

pub type PageId = u32;

pub const PAGE_SIZE: usize = 1024 * 4;
