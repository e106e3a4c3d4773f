//! SQLite-backed bucket store shared by every process that opens the same
//! state directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use leaky_core::{Applied, AtomicStore, BucketError, BucketRecord, Created, Guard, Mutation};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

pub const DB_FILE: &str = "buckets.sqlite";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Kernel {
    /// Open (creating if needed) the bucket database under `dir`.
    ///
    /// Busy timeout defaults to 5000ms; override with `LEAKY_SQLITE_BUSY_MS`.
    /// A value that is not a whole number of milliseconds is a configuration error.
    pub fn open(dir: &Path) -> Result<Self> {
        let raw = std::env::var("LEAKY_SQLITE_BUSY_MS").ok();
        let busy_ms = busy_timeout_ms(raw.as_deref())?;
        Self::open_with_busy_timeout(dir, busy_ms)
    }

    pub fn open_with_busy_timeout(dir: &Path, busy_ms: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let kernel = Self {
            db_path: dir.join(DB_FILE),
            busy_timeout: Duration::from_millis(busy_ms),
        };
        let conn = kernel.conn()?;
        // WAL lets readers proceed while one writer holds the bucket row.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(db = %kernel.db_path.display(), mode = %mode, "WAL journal unavailable");
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;
        Ok(kernel)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- One row per queue; (name, singleton) is the uniqueness guard for priming
            CREATE TABLE IF NOT EXISTS buckets (
              name TEXT NOT NULL,
              singleton INTEGER NOT NULL DEFAULT 1,
              count INTEGER NOT NULL,
              items TEXT NOT NULL,           -- JSON array, head first
              last_release_ns INTEGER NOT NULL, -- unix nanoseconds, stored exactly
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_buckets_singleton ON buckets(name, singleton);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn create_bucket(&self, record: &BucketRecord) -> Result<Created> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let items_s = serde_json::to_string(&record.items)?;
        let res = conn.execute(
            "INSERT INTO buckets(name,singleton,count,items,last_release_ns,created,updated) VALUES (?,1,?,?,?,?,?)",
            params![
                record.name,
                to_sql_count(record.count)?,
                items_s,
                to_sql_nanos(record.last_release)?,
                now,
                now
            ],
        );
        match res {
            Ok(_) => Ok(Created::Inserted),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(Created::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Evaluate `guard` and apply `mutation` inside one IMMEDIATE transaction,
    /// which holds the database write lock from the read through the commit.
    pub fn update_bucket(
        &self,
        name: &str,
        guard: &Guard,
        mutation: Mutation,
    ) -> Result<Option<Applied>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut record) = Self::read_bucket(&tx, name)? else {
            return Ok(None);
        };
        if !guard.matches(&record) {
            return Ok(None);
        }
        let removed = mutation.apply(&mut record);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let items_s = serde_json::to_string(&record.items)?;
        tx.execute(
            "UPDATE buckets SET count=?, items=?, last_release_ns=?, updated=? WHERE name=? AND singleton=1",
            params![
                to_sql_count(record.count)?,
                items_s,
                to_sql_nanos(record.last_release)?,
                now,
                name
            ],
        )?;
        tx.commit()?;
        Ok(Some(Applied { record, removed }))
    }

    pub fn get_bucket(&self, name: &str) -> Result<Option<BucketRecord>> {
        let conn = self.conn()?;
        Self::read_bucket(&conn, name)
    }

    fn read_bucket(conn: &Connection, name: &str) -> Result<Option<BucketRecord>> {
        let mut stmt = conn.prepare(
            "SELECT count,items,last_release_ns FROM buckets WHERE name=? AND singleton=1 LIMIT 1",
        )?;
        let row = stmt
            .query_row([name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .optional()?;
        let Some((count, items_s, last_ns)) = row else {
            return Ok(None);
        };
        let count = u64::try_from(count).map_err(|_| anyhow!("bucket {name}: negative count"))?;
        let items = serde_json::from_str(&items_s)
            .map_err(|e| anyhow!("bucket {name}: corrupt items: {e}"))?;
        let last_release = from_sql_nanos(last_ns)
            .ok_or_else(|| anyhow!("bucket {name}: release time out of range"))?;
        Ok(Some(BucketRecord {
            name: name.to_string(),
            count,
            items,
            last_release,
        }))
    }

    /// Rows stored under `name`; stays at most 1 however many handles prime it.
    pub fn bucket_row_count(&self, name: &str) -> Result<i64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM buckets WHERE name=?",
            [name],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn list_buckets(&self) -> Result<Vec<serde_json::Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name,count,last_release_ns,created,updated FROM buckets ORDER BY name ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let last_release =
                from_sql_nanos(r.get(2)?).map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true));
            out.push(serde_json::json!({
                "name": r.get::<_, String>(0)?,
                "count": r.get::<_, i64>(1)?,
                "last_release": last_release,
                "created": r.get::<_, String>(3)?,
                "updated": r.get::<_, String>(4)?,
            }));
        }
        Ok(out)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn create_bucket_async(&self, record: BucketRecord) -> Result<Created> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.create_bucket(&record))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn update_bucket_async(
        &self,
        name: &str,
        guard: Guard,
        mutation: Mutation,
    ) -> Result<Option<Applied>> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.update_bucket(&name, &guard, mutation))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_bucket_async(&self, name: &str) -> Result<Option<BucketRecord>> {
        let k = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || k.get_bucket(&name))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_buckets_async(&self) -> Result<Vec<serde_json::Value>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_buckets())
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

#[async_trait::async_trait]
impl AtomicStore for Kernel {
    async fn create_unique_if_absent(&self, record: BucketRecord) -> Result<Created> {
        let name = record.name.clone();
        let created = self.create_bucket_async(record).await?;
        tracing::trace!(queue = %name, ?created, "create_unique_if_absent");
        Ok(created)
    }

    async fn conditional_update(
        &self,
        name: &str,
        guard: Guard,
        mutation: Mutation,
    ) -> Result<Option<Applied>> {
        self.update_bucket_async(name, guard, mutation).await
    }

    async fn load(&self, name: &str) -> Result<Option<BucketRecord>> {
        self.get_bucket_async(name).await
    }
}

fn to_sql_count(count: u64) -> Result<i64> {
    i64::try_from(count).map_err(|_| anyhow!("count {count} exceeds storage range"))
}

fn busy_timeout_ms(raw: Option<&str>) -> Result<u64, BucketError> {
    match raw {
        None => Ok(DEFAULT_BUSY_TIMEOUT_MS),
        Some(s) => s
            .trim()
            .parse()
            .map_err(|e| BucketError::Configuration(format!("LEAKY_SQLITE_BUSY_MS: {e}"))),
    }
}

// Release times keep full precision: rounding them down would let the next
// dequeue through before the interval has elapsed.
fn to_sql_nanos(ts: DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| anyhow!("release time {ts} outside storable range"))
}

fn from_sql_nanos(ns: i64) -> Option<DateTime<Utc>> {
    let secs = ns.div_euclid(1_000_000_000);
    let nanos = u32::try_from(ns.rem_euclid(1_000_000_000)).ok()?;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}
