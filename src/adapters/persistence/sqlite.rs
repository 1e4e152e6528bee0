//! SQLite Store - Snapshot, Price History and Watermark
//!
//! Implements [`SnapshotStore`] on a single `rusqlite` connection. Each
//! long-lived loop opens its own `SqliteStore` on the same database file;
//! WAL mode lets the follower and the poller write without blocking the
//! aggregator's reads.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, info, instrument};

use super::schema;
use crate::domain::error::{IndexerError, IndexerResult};
use crate::domain::pair::{SecurityToken, TokenSpec};
use crate::domain::reconcile::{Delta, SnapshotWrite};
use crate::domain::snapshot::{PoolKey, PriceRecord, SnapshotRow, SnapshotUpdate, Watermark};
use crate::domain::utxo::{AssetMap, OutputRef, Quantity};
use crate::ports::store::SnapshotStore;

const SNAPSHOT_COLUMNS: &str = "id, pair, source, price, block_height, address, \
     token1_policy, token1_name, token1_decimals, token2_policy, token2_name, token2_decimals, \
     security_token_policy, security_token_name, token1_amount, token2_amount, \
     tx_hash, output_index, date_time";

fn store_err(err: rusqlite::Error) -> IndexerError {
    IndexerError::Store(err.to_string())
}

/// Convert an unsigned domain value into a SQLite integer.
fn to_sql_int<T>(value: T, field: &str) -> IndexerResult<i64>
where
    T: TryInto<i64> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| IndexerError::Data(format!("{field} {value} does not fit the store")))
}

/// Read a non-negative integer column into a domain type.
fn column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: TryFrom<i64>,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let raw: i64 = row.get(idx)?;
    T::try_from(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get(0)?,
        pair: row.get(1)?,
        source: row.get(2)?,
        price: row.get(3)?,
        block_height: column(row, 4)?,
        address: row.get(5)?,
        token1: TokenSpec { policy: row.get(6)?, name: row.get(7)?, decimals: column(row, 8)? },
        token2: TokenSpec { policy: row.get(9)?, name: row.get(10)?, decimals: column(row, 11)? },
        security_token: SecurityToken { policy: row.get(12)?, name: row.get(13)? },
        token1_amount: column::<Quantity>(row, 14)?,
        token2_amount: column::<Quantity>(row, 15)?,
        output: OutputRef { tx_hash: row.get(16)?, output_index: column(row, 17)? },
        date_time: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
    })
}

/// Read the latest watermark on an open connection or transaction.
fn read_watermark(conn: &Connection) -> IndexerResult<Option<(i64, Watermark)>> {
    conn.query_row(
        "SELECT id, current_block_slot, date_time FROM status ORDER BY id DESC LIMIT 1",
        [],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Watermark {
                    slot: column(row, 1)?,
                    date_time: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                },
            ))
        },
    )
    .optional()
    .map_err(store_err)
}

/// Advance the watermark if `slot` is newer. Runs inside the caller's transaction.
fn advance_in(tx: &Transaction<'_>, slot: u64, date_time: &str) -> IndexerResult<bool> {
    let slot_value = to_sql_int(slot, "slot")?;
    match read_watermark(tx)? {
        None => {
            tx.execute(
                "INSERT INTO status (current_block_slot, date_time) VALUES (?1, ?2)",
                params![slot_value, date_time],
            )
            .map_err(store_err)?;
            Ok(true)
        }
        Some((_, current)) if slot <= current.slot => Ok(false),
        Some((id, _)) => {
            tx.execute(
                "UPDATE status SET current_block_slot = ?1, date_time = ?2 WHERE id = ?3",
                params![slot_value, date_time, id],
            )
            .map_err(store_err)?;
            Ok(true)
        }
    }
}

fn insert_snapshot(tx: &Transaction<'_>, row: &SnapshotRow) -> IndexerResult<i64> {
    tx.execute(
        "INSERT INTO utxos (pair, source, price, block_height, address, \
         token1_policy, token1_name, token1_decimals, token2_policy, token2_name, token2_decimals, \
         security_token_policy, security_token_name, token1_amount, token2_amount, \
         tx_hash, output_index, date_time) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            row.pair,
            row.source,
            row.price,
            to_sql_int(row.block_height, "block_height")?,
            row.address,
            row.token1.policy,
            row.token1.name,
            row.token1.decimals,
            row.token2.policy,
            row.token2.name,
            row.token2.decimals,
            row.security_token.policy,
            row.security_token.name,
            to_sql_int(row.token1_amount, "token1_amount")?,
            to_sql_int(row.token2_amount, "token2_amount")?,
            row.output.tx_hash,
            row.output.output_index,
            row.date_time,
        ],
    )
    .map_err(store_err)?;
    Ok(tx.last_insert_rowid())
}

/// Id and height of the stored row for `row`'s pool, if another writer got there first.
fn pool_row_in(tx: &Transaction<'_>, row: &SnapshotRow) -> IndexerResult<Option<(i64, u64)>> {
    tx.query_row(
        "SELECT id, block_height FROM utxos \
         WHERE pair = ?1 AND source = ?2 AND address = ?3 \
         AND security_token_policy = ?4 AND security_token_name = ?5 \
         ORDER BY block_height DESC LIMIT 1",
        params![
            row.pair,
            row.source,
            row.address,
            row.security_token.policy,
            row.security_token.name
        ],
        |found| Ok((found.get::<_, i64>(0)?, column::<u64>(found, 1)?)),
    )
    .optional()
    .map_err(store_err)
}

fn update_snapshot(tx: &Transaction<'_>, row_id: i64, update: &SnapshotUpdate) -> IndexerResult<()> {
    tx.execute(
        "UPDATE utxos SET block_height = ?1, price = ?2, token1_amount = ?3, \
         token2_amount = ?4, tx_hash = ?5, output_index = ?6, date_time = ?7 WHERE id = ?8",
        params![
            to_sql_int(update.block_height, "block_height")?,
            update.price,
            to_sql_int(update.token1_amount, "token1_amount")?,
            to_sql_int(update.token2_amount, "token2_amount")?,
            update.output.tx_hash,
            update.output.output_index,
            update.date_time,
            row_id,
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

fn append_price(tx: &Transaction<'_>, record: &PriceRecord) -> IndexerResult<()> {
    tx.execute(
        "INSERT INTO price (pair, source, price, token1_amount, token2_amount, epoch, block_height, date_time) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.pair,
            record.source,
            record.price,
            to_sql_int(record.token1_amount, "token1_amount")?,
            to_sql_int(record.token2_amount, "token2_amount")?,
            to_sql_int(record.epoch, "epoch")?,
            to_sql_int(record.block_height, "block_height")?,
            record.date_time,
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

/// SQLite-backed snapshot store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> IndexerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexerError::Store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        schema::apply_pragmas(&conn).map_err(store_err)?;
        schema::create_all(&conn).map_err(store_err)?;
        info!(path = %path.display(), "SQLite store opened");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> IndexerResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        schema::create_all(&conn).map_err(store_err)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock(&self) -> IndexerResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IndexerError::Store("connection mutex poisoned".into()))
    }

    /// Number of rows in the snapshot table.
    pub fn snapshot_count(&self) -> IndexerResult<u64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM utxos", [], |row| column(row, 0))
            .map_err(store_err)
    }

    /// Price history for a pair, oldest first.
    pub fn price_history(&self, pair: &str) -> IndexerResult<Vec<PriceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT pair, source, price, token1_amount, token2_amount, epoch, block_height, date_time \
                 FROM price WHERE pair = ?1 ORDER BY id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![pair], |row| {
                Ok(PriceRecord {
                    pair: row.get(0)?,
                    source: row.get(1)?,
                    price: row.get(2)?,
                    token1_amount: column(row, 3)?,
                    token2_amount: column(row, 4)?,
                    epoch: column(row, 5)?,
                    block_height: column(row, 6)?,
                    date_time: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    #[instrument(skip(self))]
    async fn rebuild_snapshots(&self) -> IndexerResult<()> {
        let conn = self.lock()?;
        schema::rebuild_snapshot_table(&conn).map_err(store_err)?;
        info!("Snapshot table rebuilt");
        Ok(())
    }

    async fn watermark(&self) -> IndexerResult<Option<Watermark>> {
        let conn = self.lock()?;
        Ok(read_watermark(&conn)?.map(|(_, mark)| mark))
    }

    async fn advance_watermark(&self, slot: u64, date_time: &str) -> IndexerResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        let advanced = advance_in(&tx, slot, date_time)?;
        tx.commit().map_err(store_err)?;
        Ok(advanced)
    }

    async fn identity_count(&self, output: &OutputRef) -> IndexerResult<u64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM utxos WHERE tx_hash = ?1 AND output_index = ?2",
            params![output.tx_hash, output.output_index],
            |row| column(row, 0),
        )
        .map_err(store_err)
    }

    async fn snapshot_by_id(&self, id: i64) -> IndexerResult<Option<SnapshotRow>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {SNAPSHOT_COLUMNS} FROM utxos WHERE id = ?1"),
            params![id],
            snapshot_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    async fn snapshot_for_pool(&self, key: &PoolKey) -> IndexerResult<Option<SnapshotRow>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM utxos \
                 WHERE pair = ?1 AND source = ?2 AND address = ?3 \
                 AND security_token_policy = ?4 AND security_token_name = ?5 \
                 ORDER BY block_height DESC LIMIT 1"
            ),
            params![
                key.pair,
                key.source,
                key.address,
                key.security_token.policy,
                key.security_token.name
            ],
            snapshot_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    async fn spent_snapshot_ids(
        &self,
        inputs: &[OutputRef],
        assets: &AssetMap,
    ) -> IndexerResult<Vec<i64>> {
        if inputs.is_empty() || assets.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT id FROM utxos WHERE tx_hash = ?1 AND output_index = ?2 \
                 AND ((token1_policy = ?3 AND token1_name = ?4) \
                   OR (token2_policy = ?3 AND token2_name = ?4))",
            )
            .map_err(store_err)?;
        let mut ids = BTreeSet::new();
        for input in inputs {
            for (policy, name) in assets.tokens() {
                let found = stmt
                    .query_map(params![input.tx_hash, input.output_index, policy, name], |row| {
                        row.get::<_, i64>(0)
                    })
                    .map_err(store_err)?;
                for id in found {
                    ids.insert(id.map_err(store_err)?);
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn apply(&self, delta: &Delta) -> IndexerResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;
        match &delta.snapshot {
            SnapshotWrite::Insert(row) => match pool_row_in(&tx, row)? {
                None => {
                    let id = insert_snapshot(&tx, row)?;
                    debug!(id, pair = %row.pair, source = %row.source, "Snapshot row inserted");
                }
                Some((id, stored)) if stored <= row.block_height => {
                    update_snapshot(&tx, id, &SnapshotUpdate::from(row.as_ref()))?;
                    debug!(id, pair = %row.pair, source = %row.source, "Concurrent insert folded into update");
                }
                Some((id, stored)) => {
                    debug!(id, stored, observed = row.block_height, "Newer pool row already stored");
                }
            },
            SnapshotWrite::Update { row_id, update } => {
                update_snapshot(&tx, *row_id, update)?;
                debug!(id = row_id, "Snapshot row updated");
            }
        }
        append_price(&tx, &delta.price)?;
        advance_in(&tx, delta.watermark, &delta.price.date_time)?;
        tx.commit().map_err(store_err)
    }
}
