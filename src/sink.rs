pub mod file;
pub mod memory;
pub mod sql;

pub use self::file::{CsvFileSink, JsonLinesSink};
pub use self::memory::{MemorySink, MemoryTable};
pub use self::sql::{InsertStatement, SqlSink};
