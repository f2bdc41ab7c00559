use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};

const KEYSPACE: &str = "remotewiki";
const MAX_KEY_LENGTH: usize = 255;

const CACHE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at_unix INTEGER
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at_unix);
"#;

/// Key-value store with per-entry TTL. A `ttl` of zero means no expiry.
pub trait CacheStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()>;

    fn make_key(&self, parts: &[&str]) -> String {
        make_key(parts)
    }
}

/// Deterministic key from arbitrary parts. `%` and `:` inside parts are
/// escaped so distinct part lists never produce the same key.
pub fn make_key(parts: &[&str]) -> String {
    let mut key = String::from(KEYSPACE);
    for part in parts {
        key.push(':');
        key.push_str(&escape_part(part));
    }
    if key.len() <= MAX_KEY_LENGTH {
        return key;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut output = format!("{KEYSPACE}:hashed:");
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn escape_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_at(&self, key: &str, now: Instant) -> Result<Option<String>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache lock poisoned"))?;
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|expires| expires <= now),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_at(key, Instant::now())
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        let expires_at = (ttl > 0).then(|| Instant::now() + Duration::from_secs(ttl));
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache lock poisoned"))?
            .insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        Ok(())
    }
}

/// On-disk store shared by every process pointing at the same database file.
pub struct SqliteCache {
    connection: Connection,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Self::initialize(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory sqlite cache")?;
        Self::initialize(connection)
    }

    fn initialize(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(CACHE_SCHEMA_SQL)
            .context("failed to initialize cache schema")?;
        Ok(Self { connection })
    }

    /// Deletes expired rows, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(unix_now()?)
    }

    fn purge_expired_at(&self, now: i64) -> Result<usize> {
        self.connection
            .execute(
                "DELETE FROM cache_entries WHERE expires_at_unix IS NOT NULL AND expires_at_unix <= ?1",
                [now],
            )
            .context("failed to purge expired cache entries")
    }

    pub fn clear(&self) -> Result<usize> {
        self.connection
            .execute("DELETE FROM cache_entries", [])
            .context("failed to clear cache entries")
    }

    fn get_at(&self, key: &str, now: i64) -> Result<Option<String>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT value FROM cache_entries
                WHERE key = ?1 AND (expires_at_unix IS NULL OR expires_at_unix > ?2)
                LIMIT 1",
            )
            .context("failed to prepare cache lookup")?;
        let mut rows = statement
            .query(params![key, now])
            .with_context(|| format!("failed to read cache key {key}"))?;
        let row = match rows.next().context("failed to decode cache row")? {
            Some(row) => row,
            None => return Ok(None),
        };
        let value = row.get(0).context("failed to decode cache value")?;
        Ok(Some(value))
    }

    fn set_at(&self, key: &str, value: &str, ttl: u64, now: i64) -> Result<()> {
        let expires_at = if ttl == 0 {
            None
        } else {
            let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
            Some(now.saturating_add(ttl))
        };
        self.connection
            .execute(
                "INSERT INTO cache_entries (key, value, expires_at_unix) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at_unix = excluded.expires_at_unix",
                params![key, value, expires_at],
            )
            .with_context(|| format!("failed to write cache key {key}"))?;
        Ok(())
    }
}

impl CacheStore for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_at(key, unix_now()?)
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        self.set_at(key, value, ttl, unix_now()?)
    }
}

fn unix_now() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before unix epoch")?
        .as_secs();
    Ok(i64::try_from(seconds).unwrap_or(i64::MAX))
}
