mod page_guard_test;
mod scheduler_test;
