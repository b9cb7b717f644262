//! `SQLite` schema definitions for ecoatlas.
//!
//! This module contains the SQL statements for creating and managing
//! the offline report queue.

/// SQL statement to create the pending reports table (schema version 1).
pub const CREATE_PENDING_REPORTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pending_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    species_id TEXT,
    description TEXT NOT NULL,
    image_url TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL,
    kind TEXT NOT NULL,
    alert_level TEXT NOT NULL,
    created_at TEXT NOT NULL
)
";

/// Index on `species_id`, mirroring the browser store's secondary keys.
pub const CREATE_SPECIES_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_pending_species ON pending_reports(species_id)
";

/// Index on `kind` for alert counts.
pub const CREATE_KIND_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_pending_kind ON pending_reports(kind)
";

/// Index on `created_at` for age queries.
pub const CREATE_CREATED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_pending_created_at ON pending_reports(created_at)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Version 2: per-report idempotency key.
pub const ADD_CLIENT_REF_COLUMN: &str = r"
ALTER TABLE pending_reports ADD COLUMN client_ref TEXT
";

/// Version 2: each idempotency key identifies one report.
pub const CREATE_CLIENT_REF_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_client_ref ON pending_reports(client_ref)
";

/// Base schema statements, in order. Later versions are applied as migrations.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_PENDING_REPORTS_TABLE,
    CREATE_SPECIES_INDEX,
    CREATE_KIND_INDEX,
    CREATE_CREATED_AT_INDEX,
    CREATE_METADATA_TABLE,
];
