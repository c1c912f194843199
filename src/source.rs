pub mod file;
pub mod memory;

pub use self::file::{DelimitedFileSource, Encoding};
pub use self::memory::{MemoryItem, MemorySource};
