//! SQLite schema for the indexer store.

use rusqlite::Connection;

/// Durable tables: price history and the processed-slot watermark.
const DURABLE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS price (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    pair TEXT NOT NULL,
    source TEXT NOT NULL,
    price FLOAT NOT NULL,
    token1_amount INTEGER NOT NULL,
    token2_amount INTEGER NOT NULL,
    epoch INTEGER NOT NULL,
    block_height INTEGER NOT NULL,
    date_time TIMESTAMP
);
CREATE INDEX IF NOT EXISTS price_pair ON price(pair);
CREATE INDEX IF NOT EXISTS price_epoch ON price(epoch);

CREATE TABLE IF NOT EXISTS status (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    current_block_slot INTEGER NOT NULL,
    date_time TIMESTAMP
);
";

/// Pool snapshot table, rebuilt from scratch after a reconnect.
const SNAPSHOT_TABLE: &str = "
CREATE TABLE IF NOT EXISTS utxos (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    pair TEXT NOT NULL,
    source TEXT NOT NULL,
    price FLOAT NOT NULL,
    block_height INTEGER NOT NULL,
    address TEXT NOT NULL,
    token1_policy TEXT NOT NULL,
    token1_name TEXT NOT NULL,
    token1_decimals INTEGER NOT NULL,
    token2_policy TEXT NOT NULL,
    token2_name TEXT NOT NULL,
    token2_decimals INTEGER NOT NULL,
    security_token_policy TEXT NOT NULL,
    security_token_name TEXT NOT NULL,
    token1_amount INTEGER NOT NULL,
    token2_amount INTEGER NOT NULL,
    tx_hash TEXT NOT NULL,
    output_index INTEGER NOT NULL,
    date_time TIMESTAMP
);
CREATE INDEX IF NOT EXISTS utxos_name ON utxos(pair, source);
CREATE INDEX IF NOT EXISTS utxos_token1_policy ON utxos(token1_policy);
CREATE INDEX IF NOT EXISTS utxos_token2_policy ON utxos(token2_policy);
CREATE INDEX IF NOT EXISTS utxos_security_token_policy ON utxos(security_token_policy);
CREATE INDEX IF NOT EXISTS utxos_tx_hash ON utxos(tx_hash);
CREATE INDEX IF NOT EXISTS utxos_date_time ON utxos(date_time);
";

/// Connection settings shared by every store handle.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // journal_mode returns a row, so it cannot go through execute_batch.
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )
}

/// Create every table and index that does not exist yet.
pub fn create_all(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DURABLE_TABLES)?;
    conn.execute_batch(SNAPSHOT_TABLE)
}

/// Drop the snapshot table and recreate it empty.
pub fn rebuild_snapshot_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS utxos;")?;
    conn.execute_batch(SNAPSHOT_TABLE)
}
