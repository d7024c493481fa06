//! Storage adapters

mod sqlite;

pub use sqlite::SqliteStorage;
