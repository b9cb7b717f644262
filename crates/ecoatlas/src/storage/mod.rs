//! Storage layer for ecoatlas.
//!
//! This module provides the `SQLite`-based offline queue: sighting reports
//! are appended here on capture and removed once the backend accepts them.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::report::{AlertLevel, GeoPoint, PendingReport, ReportKind};

const SELECT_COLUMNS: &str = r"
    SELECT id, species_id, description, image_url, location, kind, alert_level,
           created_at, client_ref
    FROM pending_reports
";

/// Local store of pending sighting reports.
///
/// Reports are never deduplicated and never expire: an entry leaves the
/// store only through [`ReportStore::delete`], which the synchronizer calls
/// after the backend confirmed the insert.
#[derive(Debug)]
pub struct ReportStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl ReportStore {
    /// Open or create a report store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist,
    /// and migrates older queue files to the current schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening report queue at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Report queue opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a report to the queue and return its local id.
    ///
    /// Only the description and location are checked. Identical reports
    /// are stored as separate entries.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank description or bad location,
    /// or a database error if the insert fails.
    pub fn enqueue(&self, report: &PendingReport) -> Result<i64> {
        report.validate()?;

        self.conn.execute(
            r"
            INSERT INTO pending_reports
                (species_id, description, image_url, location, kind, alert_level,
                 created_at, client_ref)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                report.species_id,
                report.description,
                report.image_url,
                report.location.to_wkt(),
                report.kind.to_string(),
                report.alert_level.to_string(),
                report.created_at.to_rfc3339(),
                report.client_ref.to_string(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, kind = %report.kind, "Queued report");
        Ok(id)
    }

    /// Get a pending report by its local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<PendingReport>> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id],
                Self::row_to_report,
            )
            .optional()?;
        row.map(|row| self.finish_row(row)).transpose()
    }

    /// Return every readable pending report.
    ///
    /// Callers must not rely on the order; in practice it is insertion order.
    /// A row that cannot be decoded is skipped with a warning and stays in
    /// the table until it is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_pending(&self) -> Result<Vec<PendingReport>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;

        let mut decoded = Vec::new();
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            Ok((id, Self::row_to_report(row)))
        })?;
        for row in rows {
            match row? {
                (_, Ok(report)) => decoded.push(report),
                (id, Err(e)) => {
                    warn!(id, error = %e, "Skipping unreadable pending report");
                }
            }
        }
        drop(stmt);

        decoded
            .into_iter()
            .map(|row| self.finish_row(row))
            .collect()
    }

    /// Count pending reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pending_reports", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete a pending report by id.
    ///
    /// Returns `true` if a report was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM pending_reports WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Replace the image reference of a pending report.
    ///
    /// Used when a photo held as a local path is uploaded at sync time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_image_url(&self, id: i64, image_url: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE pending_reports SET image_url = ?1 WHERE id = ?2",
            params![image_url, id],
        )?;
        Ok(affected > 0)
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<QueueStats> {
        let total_pending = self.count()?;

        let alerts_pending: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_reports WHERE kind = ?1",
            [ReportKind::Alert.to_string()],
            |row| row.get(0),
        )?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM pending_reports",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(QueueStats {
            total_pending,
            alerts_pending,
            oldest_report: oldest.as_deref().and_then(parse_timestamp),
            newest_report: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    /// Save a client_ref generated while reading, so every later read and
    /// every replay of the report carries the same key.
    fn finish_row(
        &self,
        (report, client_ref_repaired): (PendingReport, bool),
    ) -> Result<PendingReport> {
        if client_ref_repaired {
            if let Some(id) = report.id {
                self.conn.execute(
                    "UPDATE pending_reports SET client_ref = ?1 WHERE id = ?2",
                    params![report.client_ref.to_string(), id],
                )?;
                info!(id, client_ref = %report.client_ref, "Assigned new client_ref");
            }
        }
        Ok(report)
    }

    fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<(PendingReport, bool)> {
        let id: i64 = row.get(0)?;
        let location_str: String = row.get(4)?;
        let kind_str: String = row.get(5)?;
        let level_str: String = row.get(6)?;
        let created_at_str: String = row.get(7)?;
        let client_ref_str: Option<String> = row.get(8)?;

        let location = GeoPoint::from_wkt(&location_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let kind = kind_str.parse::<ReportKind>().unwrap_or_else(|_| {
            warn!(id, "Unknown report kind {}, treating as observation", kind_str);
            ReportKind::Observation
        });

        let alert_level = level_str.parse::<AlertLevel>().unwrap_or_else(|_| {
            warn!(id, "Unknown alert level {}, treating as low", level_str);
            AlertLevel::Low
        });

        let created_at = parse_timestamp(&created_at_str).unwrap_or_else(|| {
            warn!(id, "Unparseable created_at {}", created_at_str);
            DateTime::<Utc>::UNIX_EPOCH
        });

        let parsed_ref = client_ref_str
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok());
        let client_ref_repaired = parsed_ref.is_none();
        let client_ref = parsed_ref.unwrap_or_else(|| {
            warn!(id, "Missing or invalid client_ref, assigning a new one");
            Uuid::new_v4()
        });

        let report = PendingReport {
            id: Some(id),
            species_id: row.get(1)?,
            description: row.get(2)?,
            image_url: row.get(3)?,
            location,
            kind,
            alert_level,
            created_at,
            client_ref,
        };
        Ok((report, client_ref_repaired))
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Statistics about the offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Number of reports waiting for sync.
    pub total_pending: i64,
    /// How many of them are alerts.
    pub alerts_pending: i64,
    /// Creation time of the oldest pending report.
    pub oldest_report: Option<DateTime<Utc>>,
    /// Creation time of the newest pending report.
    pub newest_report: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
