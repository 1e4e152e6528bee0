//! Persistence Adapters - SQLite Store
//!
//! Snapshot rows, append-only price history and the slot watermark in
//! one SQLite database (WAL mode). The snapshot table is rebuilt after a
//! chain-sync reconnect; the other tables persist across restarts.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;
