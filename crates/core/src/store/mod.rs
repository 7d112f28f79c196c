//! Transactional storage engine over embedded SQLite
//!
//! Every multi-statement mutation runs inside a `BEGIN IMMEDIATE`
//! transaction so concurrent workers see either the whole change or
//! none of it; the schema's uniqueness constraints are the
//! authoritative correctness guards. Busy and locked errors are
//! retried forever with randomized backoff on top of the 1 s busy
//! timeout every connection carries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use thiserror::Error;

use crate::log::{Silent, StoreLog};

mod collections;
mod nonces;
mod principals;
mod proxies;
mod resources;

pub use nonces::NonceCheck;

/// Database file name inside the calendar directory.
pub const DB_FILE: &str = "kalends.db";

/// A fatal storage failure. Constraint rejections are not errors; they
/// come back as [`Mutation::Constraint`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("stored resource is not valid iCalendar: {0}")]
    BadResource(#[from] kalends_ical::ParseError),
    #[error("{0}")]
    Sys(String),
    #[error("database not initialized: {}", .0.display())]
    Uninitialized(PathBuf),
}

/// Outcome of a mutation that may be rejected by a schema constraint.
/// The caller decides whether `Constraint` means "already exists" or
/// "not found" for the operation at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation<T = ()> {
    Done(T),
    Constraint,
}

impl<T> Mutation<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Mutation::Done(v) => Some(v),
            Mutation::Constraint => None,
        }
    }
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS database (
    owneruid INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS principal (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    hash TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS collection (
    id INTEGER PRIMARY KEY,
    principal INTEGER NOT NULL REFERENCES principal(id),
    url TEXT NOT NULL,
    displayname TEXT NOT NULL DEFAULT 'Calendar',
    colour TEXT NOT NULL DEFAULT '#B90E28FF',
    description TEXT NOT NULL DEFAULT '',
    ctag INTEGER NOT NULL DEFAULT 1,
    UNIQUE (principal, url)
);
CREATE TABLE IF NOT EXISTS resource (
    id INTEGER PRIMARY KEY,
    collection INTEGER NOT NULL REFERENCES collection(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    etag TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE (collection, url)
);
CREATE TABLE IF NOT EXISTS nonce (
    id INTEGER PRIMARY KEY,
    nonce TEXT NOT NULL UNIQUE,
    count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);
CREATE TABLE IF NOT EXISTS proxy (
    id INTEGER PRIMARY KEY,
    principal INTEGER NOT NULL REFERENCES principal(id),
    proxy INTEGER NOT NULL REFERENCES principal(id),
    bits INTEGER NOT NULL DEFAULT 0,
    UNIQUE (principal, proxy)
);
";

/// Whether an error is SQLite telling us to back off and retry.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "517"))
        }
        _ => false,
    }
}

/// Whether an error is a schema constraint rejecting the write.
fn is_constraint(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation() || db.is_foreign_key_violation(),
        _ => false,
    }
}

/// Randomized sleep between retries. The jitter keeps concurrent
/// workers from waking in lockstep.
async fn backoff(attempt: usize) {
    let cap = if attempt < 10 { 100_000 } else { 400_000 };
    let micros = { rand::rng().random_range(0..cap) };
    tokio::time::sleep(Duration::from_micros(micros)).await;
}

/// `"<u32>-<u32>"` from two random draws.
pub(crate) fn random_etag() -> String {
    let mut rng = rand::rng();
    let (a, b): (u32, u32) = (rng.random(), rng.random());
    format!("{a}-{b}")
}

/// A 16-hex-digit nonce value.
pub(crate) fn random_nonce() -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut rng = rand::rng();
    (0..16)
        .map(|_| HEX[rng.random_range(0..16usize)] as char)
        .collect()
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    db_path: PathBuf,
    log: Arc<dyn StoreLog>,
}

impl Store {
    /// Open the database under `dir`, creating the file and schema
    /// only when `create` is set. Without `create`, a directory that
    /// was never bootstrapped is an error.
    pub async fn open(dir: &Path, create: bool) -> Result<Store, StoreError> {
        let db_path = dir.join(DB_FILE);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(create)
            .busy_timeout(Duration::from_secs(1))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Store {
            pool,
            db_path,
            log: Arc::new(Silent),
        };

        if create {
            sqlx::raw_sql(SCHEMA).execute(&store.pool).await?;
        } else {
            let tables: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='database'",
            )
            .fetch_one(&store.pool)
            .await?;
            if tables == 0 {
                return Err(StoreError::Uninitialized(store.db_path));
            }
        }

        Ok(store)
    }

    pub fn set_log(&mut self, log: Arc<dyn StoreLog>) {
        self.log = log;
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn log(&self) -> &dyn StoreLog {
        &*self.log
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start an IMMEDIATE transaction, retrying while the writer lock
    /// is contended. Dropping the returned transaction rolls back.
    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        let mut attempt = 0usize;
        loop {
            match self.pool.begin_with("BEGIN IMMEDIATE").await {
                Ok(tx) => return Ok(tx),
                Err(e) if is_busy(&e) => {
                    self.log
                        .debug(format_args!("begin immediate: busy (re-trying)"));
                    backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run a read, retrying while SQLite reports busy/locked.
    pub(crate) async fn with_retry<T>(
        &self,
        mut op: impl AsyncFnMut() -> Result<T, sqlx::Error>,
    ) -> Result<T, sqlx::Error> {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Err(e) if is_busy(&e) => {
                    self.log.debug(format_args!("query: busy (re-trying)"));
                    backoff(attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// File-system quota figures for the volume holding the database.
    pub(crate) fn quota_figures(&self) -> Result<(u64, u64), StoreError> {
        let vfs = nix::sys::statvfs::statvfs(self.db_path.as_path())
            .map_err(|e| StoreError::Sys(format!("statvfs: {e}")))?;
        let bsize = vfs.block_size() as u64;
        Ok((
            vfs.blocks() as u64 * bsize,
            vfs.blocks_free() as u64 * bsize,
        ))
    }

    /// Check the recorded owner uid, recording it on first use. Uid 0
    /// overrides. `Constraint` means the database belongs to someone
    /// else.
    pub async fn owner_check_or_set(&self, uid: i64) -> Result<Mutation, StoreError> {
        let row = self
            .with_retry(async || {
                sqlx::query("SELECT owneruid FROM database")
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;

        match row {
            Some(row) => {
                let owner: i64 = row.get(0);
                if uid == 0 && owner != uid {
                    self.log.info(format_args!("root overriding: {owner}"));
                }
                if uid == 0 || owner == uid {
                    Ok(Mutation::Done(()))
                } else {
                    Ok(Mutation::Constraint)
                }
            }
            None => {
                sqlx::query("INSERT INTO database (owneruid) VALUES (?)")
                    .bind(uid)
                    .execute(&self.pool)
                    .await?;
                Ok(Mutation::Done(()))
            }
        }
    }
}
