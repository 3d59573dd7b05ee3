//! SQLite-backed resolver store using the PowerDNS `gsqlite3` layout:
//! one `domains` row per zone and one `records` row per published RR.
//!
//! Calls are short single-statement operations behind an async mutex, so
//! they are safe to issue from spawned background tasks without starving
//! the request path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{ResolverRecord, ResolverStore, StorageError, StorageResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS domains (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL UNIQUE,
    type  TEXT NOT NULL DEFAULT 'NATIVE'
);
CREATE TABLE IF NOT EXISTS records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_id   INTEGER NOT NULL,
    name        TEXT NOT NULL,
    type        TEXT NOT NULL,
    content     TEXT NOT NULL,
    ttl         INTEGER NOT NULL DEFAULT 3600,
    prio        INTEGER NOT NULL DEFAULT 0,
    disabled    INTEGER NOT NULL DEFAULT 0,
    change_date INTEGER,
    created_at  TEXT
);
CREATE INDEX IF NOT EXISTS records_name_idx ON records (name);
CREATE INDEX IF NOT EXISTS records_domain_idx ON records (domain_id);
";

pub struct SqliteResolverStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteResolverStore {
    pub fn open(path: &str) -> StorageResult<Self> {
        let connection = Connection::open(path)?;
        Self::from_connection(connection)
    }

    pub fn from_connection(connection: Connection) -> StorageResult<Self> {
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(connection)),
        })
    }

    /// Zone lookup by longest matching suffix, so `www.example.com` lands
    /// in the `example.com` zone. The zone table is small; matching in
    /// process beats string games in SQL.
    fn zone_id_for_name(conn: &Connection, name: &str) -> StorageResult<i64> {
        let mut stmt = conn.prepare("SELECT id, name FROM domains")?;
        let zones = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        zones
            .into_iter()
            .filter(|(_, zone)| name == zone || name.ends_with(&format!(".{}", zone)))
            .max_by_key(|(_, zone)| zone.len())
            .map(|(id, _)| id)
            .ok_or_else(|| StorageError::ZoneNotFound(name.to_string()))
    }

    fn lookup_zone(conn: &Connection, zone: &str) -> StorageResult<Option<i64>> {
        let id = conn
            .query_row(
                "SELECT id FROM domains WHERE name = ?1",
                params![zone],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_rr(
        conn: &Connection,
        zone_id: i64,
        name: &str,
        record_type: &str,
        content: &str,
        ttl: u32,
    ) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO records (domain_id, name, type, content, ttl, prio, disabled, change_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, strftime('%s','now'), datetime('now'))",
            params![zone_id, name, record_type, content, ttl],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ResolverStore for SqliteResolverStore {
    async fn ensure_zone(&self, zone: &str, nameservers: &[String]) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        if Self::lookup_zone(&conn, zone)?.is_some() {
            return Ok(());
        }

        conn.execute(
            "INSERT INTO domains (name, type) VALUES (?1, 'NATIVE')",
            params![zone],
        )?;
        let zone_id = conn.last_insert_rowid();

        // Serial format: YYYYMMDDNN
        let serial = Utc::now().format("%Y%m%d01").to_string();
        let primary = nameservers
            .first()
            .map(|ns| ns.trim_end_matches('.'))
            .unwrap_or("ns1.invalid");
        let soa = format!(
            "{}. hostmaster.{}. {} 10800 3600 604800 3600",
            primary, zone, serial
        );
        Self::insert_rr(&conn, zone_id, zone, "SOA", &soa, 3600)?;

        for ns in nameservers {
            Self::insert_rr(&conn, zone_id, zone, "NS", ns, 3600)?;
        }
        Ok(())
    }

    async fn delete_zone(&self, zone: &str) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        if let Some(zone_id) = Self::lookup_zone(&conn, zone)? {
            conn.execute("DELETE FROM records WHERE domain_id = ?1", params![zone_id])?;
            conn.execute("DELETE FROM domains WHERE id = ?1", params![zone_id])?;
        }
        Ok(())
    }

    async fn zone_exists(&self, zone: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().await;
        Ok(Self::lookup_zone(&conn, zone)?.is_some())
    }

    async fn insert_record(
        &self,
        name: &str,
        record_type: &str,
        content: &str,
        ttl: u32,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let zone_id = Self::zone_id_for_name(&conn, name)?;
        Self::insert_rr(&conn, zone_id, name, record_type, content, ttl)
    }

    async fn delete_record(
        &self,
        name: &str,
        record_type: &str,
        content: &str,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM records WHERE name = ?1 AND type = ?2 AND content = ?3",
            params![name, record_type, content],
        )?;
        Ok(())
    }

    async fn delete_address_records(&self, zone: &str) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        if let Some(zone_id) = Self::lookup_zone(&conn, zone)? {
            conn.execute(
                "DELETE FROM records WHERE domain_id = ?1 AND type IN ('A', 'AAAA', 'CNAME')",
                params![zone_id],
            )?;
        }
        Ok(())
    }

    async fn zone_records(&self, zone: &str) -> StorageResult<Vec<ResolverRecord>> {
        let conn = self.conn.lock().await;
        let zone_id = match Self::lookup_zone(&conn, zone)? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        let mut stmt = conn.prepare(
            "SELECT name, type, content, ttl FROM records WHERE domain_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![zone_id], |row| {
                Ok(ResolverRecord {
                    name: row.get(0)?,
                    record_type: row.get(1)?,
                    content: row.get(2)?,
                    ttl: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
