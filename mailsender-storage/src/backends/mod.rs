//! Storage backend implementations
//!
//! - `memory`: In-memory storage for tests and development
//! - `file`: Durable one-record-per-letter directory storage
//! - `test`: Memory storage with synchronization and failure injection

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use test::TestStorage;
