//! SQL schema for the Tether SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subjects (
    subject_id          TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    device_id           TEXT NOT NULL,
    monitoring_active   INTEGER NOT NULL DEFAULT 1,
    priority            TEXT NOT NULL DEFAULT 'medium', -- 'high' | 'medium' | 'low'
    emergency_contacts  TEXT NOT NULL DEFAULT '[]',     -- JSON array
    notification_prefs  TEXT NOT NULL,                  -- JSON object
    last_known_location TEXT,                           -- JSON object or NULL
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS safe_zones (
    zone_id     TEXT PRIMARY KEY,
    subject_id  TEXT NOT NULL REFERENCES subjects(subject_id),
    name        TEXT NOT NULL,
    description TEXT,
    geometry    TEXT NOT NULL,   -- JSON-encoded ZoneGeometry (tagged)
    schedule    TEXT,            -- JSON-encoded ZoneSchedule or NULL
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

-- Verification records are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS verifications (
    record_id          TEXT PRIMARY KEY,
    subject_id         TEXT NOT NULL REFERENCES subjects(subject_id),
    checked_at         TEXT NOT NULL,   -- RFC 3339 UTC, fixed width
    boundary_violation INTEGER NOT NULL,
    status             TEXT NOT NULL,   -- 'success' | 'partial_success' | 'failed'
    record_json        TEXT NOT NULL    -- full VerificationRecord
);

CREATE INDEX IF NOT EXISTS subjects_monitoring_idx  ON subjects(monitoring_active);
CREATE INDEX IF NOT EXISTS zones_subject_idx        ON safe_zones(subject_id, is_active);
CREATE INDEX IF NOT EXISTS verifications_subject_idx
    ON verifications(subject_id, checked_at);
CREATE INDEX IF NOT EXISTS verifications_violation_idx
    ON verifications(boundary_violation);

PRAGMA user_version = 1;
";
