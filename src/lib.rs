// This is a successor of the artisan_platform
pub mod config;
pub mod errors;
pub mod logger;
pub mod process;
pub mod queue;

// tests
#[path = "../src/tests/process_test.rs"]
mod process_test;

#[path = "../src/tests/queue_test.rs"]
mod queue_test;
