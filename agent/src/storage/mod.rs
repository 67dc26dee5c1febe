//! SQLite local store: error log, sample history and the undelivered-sample cache

mod lock;

pub use lock::{DbLock, DbLockGuard};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use schema::{AgentError, Result, Sample, SampleRow, CACHE_LIMIT, DISPLAY_TIMESTAMP_FORMAT, ROW_WIDTH};
use std::cell::RefCell;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Cache table columns after `id` and `timestamp`, in row order
const CACHE_COLUMNS: [&str; ROW_WIDTH] = [
    "display_timestamp",
    "ping_time",
    "download_rate",
    "upload_rate",
    "ssid",
    "bssid",
    "freq",
    "bit_rate",
    "signal_level",
    "ip_address",
    "speedtest_server",
    "location",
    "ping_host1",
    "pkts_tx1",
    "percent_loss1",
    "rtt_avg1",
    "ping_host2",
    "pkts_tx2",
    "percent_loss2",
    "rtt_avg2",
    "ping_host3",
    "pkts_tx3",
    "percent_loss3",
    "rtt_avg3",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLogEntry {
    pub timestamp: i64,
    pub display_timestamp: String,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn at(time: DateTime<Local>, message: impl Into<String>) -> Self {
        Self {
            timestamp: time.timestamp(),
            display_timestamp: time.format(DISPLAY_TIMESTAMP_FORMAT).to_string(),
            message: message.into(),
        }
    }
}

/// A sample that failed remote delivery; `id` is the replay order
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: i64,
    pub timestamp: i64,
    pub row: SampleRow,
}

/// One row of the local sample history
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub timestamp: i64,
    pub display_timestamp: String,
    pub ping_time: String,
    pub download_rate: String,
    pub upload_rate: String,
    pub ssid: String,
    pub bssid: String,
    pub freq: String,
    pub bit_rate: String,
    pub signal_level: String,
    pub ip_address: String,
}

pub struct LocalStore {
    conn: Connection,
    /// None for a volatile in-memory store
    lock: Option<DbLock>,
    /// Entries logged through this handle, kept for the console mirror
    logged: RefCell<Vec<ErrorLogEntry>>,
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(path: P, lock: DbLock) -> Result<Self> {
        let _guard = lock.acquire()?;
        
        let conn = Connection::open(path)
            .map_err(|e| AgentError::storage("open", e))?;
        
        // Set busy timeout to 5 seconds (handles brief lock conflicts)
        conn.pragma_update(None, "busy_timeout", "5000")
            .map_err(|e| AgentError::storage("open", e))?;
        
        let store = Self {
            conn,
            lock: Some(lock),
            logged: RefCell::new(Vec::new()),
        };
        store.initialize()?;
        
        Ok(store)
    }
    
    /// In-memory store that lives only as long as this process
    pub fn volatile() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AgentError::storage("open", e))?;
        
        let store = Self {
            conn,
            lock: None,
            logged: RefCell::new(Vec::new()),
        };
        store.initialize()?;
        
        Ok(store)
    }
    
    /// Open the database, or fall back to a volatile store when it cannot be
    /// opened so the run can still deliver remotely. The failure is logged
    /// through the returned store.
    pub fn open_or_volatile<P: AsRef<Path>>(path: P, lock: DbLock) -> Result<Self> {
        let path = path.as_ref();
        match Self::open(path, lock) {
            Ok(store) => Ok(store),
            Err(e) => {
                error!("Local database {:?} unavailable: {}", path, e);
                let store = Self::volatile()?;
                store.log_error(format!(
                    "Local database unavailable ({}); results that fail delivery will not be kept",
                    e
                ));
                Ok(store)
            }
        }
    }
    
    /// False for the volatile fallback store
    pub fn is_persistent(&self) -> bool {
        self.lock.is_some()
    }
    
    fn guard(&self) -> Result<Option<DbLockGuard>> {
        self.lock.as_ref().map(DbLock::acquire).transpose()
    }
    
    fn initialize(&self) -> Result<()> {
        debug!("Initializing database schema");
        
        let cache_columns: Vec<String> = CACHE_COLUMNS
            .iter()
            .map(|c| format!("{} TEXT NOT NULL", c))
            .collect();
        
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS error_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                display_timestamp TEXT NOT NULL,
                message TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_error_logs_timestamp ON error_logs(timestamp);
            
            CREATE TABLE IF NOT EXISTS speedtest_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                display_timestamp TEXT NOT NULL,
                ping_time TEXT NOT NULL,
                download_rate TEXT NOT NULL,
                upload_rate TEXT NOT NULL,
                ssid TEXT NOT NULL,
                bssid TEXT NOT NULL,
                freq TEXT NOT NULL,
                bit_rate TEXT NOT NULL,
                signal_level TEXT NOT NULL,
                ip_address TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_speedtest_data_timestamp ON speedtest_data(timestamp);
            
            CREATE TABLE IF NOT EXISTS cached_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                {}
            );",
            cache_columns.join(",\n                ")
        );
        
        self.conn
            .execute_batch(&sql)
            .map_err(|e| AgentError::storage("initialize schema", e))
    }
    
    /// Append an error to the local log. Never fails: when the database is
    /// unavailable the message goes to standard error instead.
    pub fn log_error(&self, message: impl Into<String>) {
        let entry = ErrorLogEntry::at(Local::now(), message);
        warn!("{}", entry.message);
        
        if let Err(e) = self.insert_error(&entry) {
            error!("Local error log unavailable ({}): {}", e, entry.message);
        }
        
        self.logged.borrow_mut().push(entry);
    }
    
    pub fn insert_error(&self, entry: &ErrorLogEntry) -> Result<()> {
        let _guard = self.guard()?;
        
        self.conn
            .execute(
                "INSERT INTO error_logs (timestamp, display_timestamp, message) VALUES (?1, ?2, ?3)",
                params![entry.timestamp, &entry.display_timestamp, &entry.message],
            )
            .map_err(|e| AgentError::storage("insert error log", e))?;
        
        Ok(())
    }
    
    /// Entries logged through this handle since the last call
    pub fn take_logged(&self) -> Vec<ErrorLogEntry> {
        std::mem::take(&mut *self.logged.borrow_mut())
    }
    
    pub fn error_logs(&self) -> Result<Vec<ErrorLogEntry>> {
        let _guard = self.guard()?;
        
        let mut stmt = self.conn
            .prepare("SELECT timestamp, display_timestamp, message FROM error_logs ORDER BY id ASC")
            .map_err(|e| AgentError::storage("query error log", e))?;
        
        let entries = stmt
            .query_map([], |row| {
                Ok(ErrorLogEntry {
                    timestamp: row.get(0)?,
                    display_timestamp: row.get(1)?,
                    message: row.get(2)?,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| AgentError::storage("query error log", e))?;
        
        Ok(entries)
    }
    
    /// Delete error log entries with `timestamp <= cutoff`
    pub fn delete_errors_through(&self, cutoff: i64) -> Result<usize> {
        let _guard = self.guard()?;
        
        let deleted = self.conn
            .execute("DELETE FROM error_logs WHERE timestamp <= ?1", params![cutoff])
            .map_err(|e| AgentError::storage("prune error log", e))?;
        
        debug!("Deleted {} error log entries", deleted);
        Ok(deleted)
    }
    
    /// Insert an undelivered sample, then evict all but the newest
    /// [`CACHE_LIMIT`] entries. Returns the number of evicted entries.
    pub fn cache_sample(&self, timestamp: i64, row: &SampleRow) -> Result<usize> {
        let _guard = self.guard()?;
        
        let tx = self.conn
            .unchecked_transaction()
            .map_err(|e| AgentError::storage("cache sample", e))?;
        
        let evicted = insert_cached(&tx, timestamp, row)?;
        
        tx.commit()
            .map_err(|e| AgentError::storage("cache sample", e))?;
        
        if evicted > 0 {
            warn!("Cache full: evicted {} oldest undelivered samples", evicted);
        }
        
        Ok(evicted)
    }
    
    /// All cached entries, oldest first
    pub fn cached_entries(&self) -> Result<Vec<CacheEntry>> {
        let _guard = self.guard()?;
        
        let sql = format!(
            "SELECT id, timestamp, {} FROM cached_results ORDER BY id ASC",
            CACHE_COLUMNS.join(", ")
        );
        
        let mut stmt = self.conn
            .prepare(&sql)
            .map_err(|e| AgentError::storage("read cache", e))?;
        
        let entries = stmt
            .query_map([], |row| {
                let mut cells = Vec::with_capacity(ROW_WIDTH);
                for i in 0..ROW_WIDTH {
                    let cell: Option<String> = row.get(i + 2)?;
                    cells.push(cell.unwrap_or_default());
                }
                
                Ok(CacheEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    row: SampleRow::from_cells(cells),
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| AgentError::storage("read cache", e))?;
        
        Ok(entries)
    }
    
    /// Remove the given cache entries (used after they were replayed)
    pub fn remove_cached(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        
        let _guard = self.guard()?;
        
        let tx = self.conn
            .unchecked_transaction()
            .map_err(|e| AgentError::storage("clear replayed cache entries", e))?;
        
        let mut removed = 0;
        for id in ids {
            removed += tx
                .execute("DELETE FROM cached_results WHERE id = ?1", params![id])
                .map_err(|e| AgentError::storage("clear replayed cache entries", e))?;
        }
        
        tx.commit()
            .map_err(|e| AgentError::storage("clear replayed cache entries", e))?;
        
        Ok(removed)
    }
    
    /// Import rows from a legacy CSV cache file, then remove the file.
    ///
    /// Legacy rows are narrower than the current layout; they are padded with
    /// "NA". The epoch timestamp is recovered from the display timestamp when
    /// possible. The file is imported whole or not at all.
    pub fn import_legacy_cache<P: AsRef<Path>>(&self, path: P, now: DateTime<Local>) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(0);
        }
        
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| AgentError::storage("open legacy cache", e))?;
        
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| AgentError::storage("read legacy cache", e))?;
            let row = SampleRow::from_cells(record.iter().map(|c| c.to_string()).collect());
            
            let timestamp = NaiveDateTime::parse_from_str(row.display_timestamp(), DISPLAY_TIMESTAMP_FORMAT)
                .ok()
                .and_then(|naive| Local.from_local_datetime(&naive).earliest())
                .map(|t| t.timestamp())
                .unwrap_or_else(|| now.timestamp());
            rows.push((timestamp, row));
        }
        
        {
            let _guard = self.guard()?;
            let tx = self.conn
                .unchecked_transaction()
                .map_err(|e| AgentError::storage("import legacy cache", e))?;
            for (timestamp, row) in &rows {
                insert_cached(&tx, *timestamp, row)?;
            }
            tx.commit()
                .map_err(|e| AgentError::storage("import legacy cache", e))?;
        }
        
        std::fs::remove_file(path)
            .map_err(|e| AgentError::storage("remove legacy cache", e))?;
        
        info!("Imported {} rows from legacy cache {:?}", rows.len(), path);
        Ok(rows.len())
    }
    
    pub fn record_history(&self, sample: &Sample) -> Result<()> {
        let _guard = self.guard()?;
        
        let row = sample.to_row();
        let cells = row.cells();
        
        self.conn
            .execute(
                "INSERT INTO speedtest_data (
                    timestamp, display_timestamp, ping_time, download_rate, upload_rate,
                    ssid, bssid, freq, bit_rate, signal_level, ip_address
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    sample.timestamp,
                    &cells[0],
                    &cells[1],
                    &cells[2],
                    &cells[3],
                    &cells[4],
                    &cells[5],
                    &cells[6],
                    &cells[7],
                    &cells[8],
                    &cells[9],
                ],
            )
            .map_err(|e| AgentError::storage("record history", e))?;
        
        Ok(())
    }
    
    pub fn query_history(&self, start: i64, end: i64) -> Result<Vec<HistoryRecord>> {
        let _guard = self.guard()?;
        
        let mut stmt = self.conn
            .prepare(
                "SELECT
                    timestamp, display_timestamp, ping_time, download_rate, upload_rate,
                    ssid, bssid, freq, bit_rate, signal_level, ip_address
                FROM speedtest_data
                WHERE timestamp >= ?1 AND timestamp <= ?2
                ORDER BY timestamp ASC",
            )
            .map_err(|e| AgentError::storage("query history", e))?;
        
        let records = stmt
            .query_map(params![start, end], |row| {
                Ok(HistoryRecord {
                    timestamp: row.get(0)?,
                    display_timestamp: row.get(1)?,
                    ping_time: row.get(2)?,
                    download_rate: row.get(3)?,
                    upload_rate: row.get(4)?,
                    ssid: row.get(5)?,
                    bssid: row.get(6)?,
                    freq: row.get(7)?,
                    bit_rate: row.get(8)?,
                    signal_level: row.get(9)?,
                    ip_address: row.get(10)?,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| AgentError::storage("query history", e))?;
        
        Ok(records)
    }
    
    /// Delete history rows with `timestamp <= cutoff`
    pub fn delete_history_through(&self, cutoff: i64) -> Result<usize> {
        let _guard = self.guard()?;
        
        let deleted = self.conn
            .execute("DELETE FROM speedtest_data WHERE timestamp <= ?1", params![cutoff])
            .map_err(|e| AgentError::storage("prune history", e))?;
        
        debug!("Deleted {} history rows", deleted);
        Ok(deleted)
    }
}

/// Insert one cache row and evict down to [`CACHE_LIMIT`], inside the
/// caller's transaction
fn insert_cached(conn: &Connection, timestamp: i64, row: &SampleRow) -> Result<usize> {
    let placeholders: Vec<String> = (1..=ROW_WIDTH + 1).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO cached_results (timestamp, {}) VALUES ({})",
        CACHE_COLUMNS.join(", "),
        placeholders.join(", ")
    );
    
    let mut values: Vec<Value> = Vec::with_capacity(ROW_WIDTH + 1);
    values.push(Value::Integer(timestamp));
    values.extend(row.cells().iter().cloned().map(Value::Text));
    
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| AgentError::storage("cache sample", e))?;
    
    conn.execute(
        "DELETE FROM cached_results WHERE id NOT IN
            (SELECT id FROM cached_results ORDER BY id DESC LIMIT ?1)",
        params![CACHE_LIMIT as i64],
    )
    .map_err(|e| AgentError::storage("evict cached samples", e))
}
