use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::debug;

use super::sqlite::Database;
use crate::error::Result;
use crate::model::{AuditAction, AuditEntry, CategorizationRule};

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed-width UTC form so lexical order equals chronological order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn audit_entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let raw_ts: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    let raw_action: String = row.get(2)?;
    let action = raw_action
        .parse::<AuditAction>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp,
        action,
        details: row.get(3)?,
    })
}

impl Database {
    // ── Rules ────────────────────────────────────────────────────

    pub fn load_rules(&self) -> Result<Vec<CategorizationRule>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT pattern, category FROM rule ORDER BY position")?;
        let rules = stmt
            .query_map([], |row| {
                Ok(CategorizationRule {
                    pattern: row.get(0)?,
                    category: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Insert a rule at the end of the list, or overwrite the category of an
    /// existing pattern in place.
    pub fn upsert_rule(&self, rule: &CategorizationRule) -> Result<()> {
        self.connection().execute(
            "INSERT INTO rule (pattern, category, position) \
             VALUES (?1, ?2, (SELECT COALESCE(MAX(position) + 1, 0) FROM rule)) \
             ON CONFLICT(pattern) DO UPDATE SET category = excluded.category",
            params![rule.pattern, rule.category],
        )?;
        Ok(())
    }

    /// Returns true when a row was removed.
    pub fn delete_rule(&self, pattern: &str) -> Result<bool> {
        let removed = self
            .connection()
            .execute("DELETE FROM rule WHERE pattern = ?1", params![pattern])?;
        Ok(removed > 0)
    }

    // ── Scan paths ───────────────────────────────────────────────

    pub fn load_scan_paths(&self) -> Result<Vec<String>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT path FROM scan_path ORDER BY position")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    pub fn replace_scan_paths(&self, paths: &[String]) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM scan_path", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO scan_path (position, path) VALUES (?1, ?2)")?;
            for (position, path) in paths.iter().enumerate() {
                stmt.execute(params![position as i64, path])?;
            }
        }
        tx.commit()?;
        debug!("Stored {} scan paths", paths.len());
        Ok(())
    }

    // ── Audit log ────────────────────────────────────────────────

    /// Appends an entry. The timestamp is taken while the connection lock is
    /// held, so timestamps never run backwards relative to the sequence.
    pub fn append_audit(&self, action: AuditAction, details: &str) -> Result<AuditEntry> {
        let conn = self.connection();
        let timestamp = Utc::now();
        conn.execute(
            "INSERT INTO audit_entry (timestamp, action, details) VALUES (?1, ?2, ?3)",
            params![format_timestamp(&timestamp), action.as_str(), details],
        )?;
        Ok(AuditEntry {
            id: conn.last_insert_rowid(),
            timestamp,
            action,
            details: details.to_string(),
        })
    }

    /// Newest first. `date` matches the UTC calendar day of the timestamp.
    pub fn query_audit(
        &self,
        action: Option<AuditAction>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AuditEntry>> {
        let mut sql =
            String::from("SELECT id, timestamp, action, details FROM audit_entry WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();
        if let Some(action) = action {
            args.push(action.as_str().to_string());
            sql.push_str(&format!(" AND action = ?{}", args.len()));
        }
        if let Some(date) = date {
            args.push(date.format("%Y-%m-%d").to_string());
            sql.push_str(&format!(" AND substr(timestamp, 1, 10) = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(args.iter()), audit_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    // ── Hash cache ───────────────────────────────────────────────

    /// Cached digest for `path`, only if size and mtime still match.
    pub fn cached_fingerprint(&self, path: &str, size: u64, mtime_ns: i64) -> Result<Option<String>> {
        let digest = self
            .connection()
            .query_row(
                "SELECT digest FROM hash_cache WHERE path = ?1 AND size = ?2 AND mtime_ns = ?3",
                params![path, size as i64, mtime_ns],
                |row| row.get(0),
            )
            .optional()?;
        Ok(digest)
    }

    pub fn store_fingerprint(&self, path: &str, size: u64, mtime_ns: i64, digest: &str) -> Result<()> {
        self.connection().execute(
            "INSERT INTO hash_cache (path, size, mtime_ns, digest) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(path) DO UPDATE SET size = excluded.size, \
             mtime_ns = excluded.mtime_ns, digest = excluded.digest",
            params![path, size as i64, mtime_ns, digest],
        )?;
        Ok(())
    }

    pub fn forget_fingerprint(&self, path: &str) -> Result<()> {
        self.connection()
            .execute("DELETE FROM hash_cache WHERE path = ?1", params![path])?;
        Ok(())
    }

    pub fn count_cached_fingerprints(&self) -> Result<usize> {
        let count: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM hash_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn clear_fingerprints(&self) -> Result<()> {
        self.connection().execute("DELETE FROM hash_cache", [])?;
        debug!("Hash cache cleared");
        Ok(())
    }
}
