//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that string comparison in SQL orders them correctly. Structured
//! fields are stored as compact JSON. UUIDs are hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tether_core::{
  record::CheckStatus,
  subject::{Priority, Subject},
  zone::SafeZone,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Priority ─────────────────────────────────────────────────────────────────

pub fn encode_priority(p: Priority) -> &'static str {
  match p {
    Priority::High => "high",
    Priority::Medium => "medium",
    Priority::Low => "low",
  }
}

pub fn decode_priority(s: &str) -> Result<Priority> {
  match s {
    "high" => Ok(Priority::High),
    "medium" => Ok(Priority::Medium),
    "low" => Ok(Priority::Low),
    other => Err(Error::Decode { column: "priority", value: other.to_owned() }),
  }
}

// ─── CheckStatus ──────────────────────────────────────────────────────────────

/// Mirrors the serde names so the column and the JSON body agree.
pub fn encode_status(s: CheckStatus) -> &'static str {
  match s {
    CheckStatus::Success => "success",
    CheckStatus::PartialSuccess => "partial_success",
    CheckStatus::Failed => "failed",
  }
}

// ─── JSON columns ─────────────────────────────────────────────────────────────

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_json<T: DeserializeOwned>(s: &str) -> Result<T> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawSubject::from_row`].
pub const SUBJECT_COLUMNS: &str = "subject_id, name, device_id, monitoring_active, priority, \
   emergency_contacts, notification_prefs, last_known_location, created_at";

/// Raw values read directly from a `subjects` row.
pub struct RawSubject {
  pub subject_id:          String,
  pub name:                String,
  pub device_id:           String,
  pub monitoring_active:   bool,
  pub priority:            String,
  pub emergency_contacts:  String,
  pub notification_prefs:  String,
  pub last_known_location: Option<String>,
  pub created_at:          String,
}

impl RawSubject {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:          row.get(0)?,
      name:                row.get(1)?,
      device_id:           row.get(2)?,
      monitoring_active:   row.get(3)?,
      priority:            row.get(4)?,
      emergency_contacts:  row.get(5)?,
      notification_prefs:  row.get(6)?,
      last_known_location: row.get(7)?,
      created_at:          row.get(8)?,
    })
  }

  pub fn into_subject(self) -> Result<Subject> {
    Ok(Subject {
      subject_id:          decode_uuid(&self.subject_id)?,
      name:                self.name,
      device_id:           self.device_id,
      monitoring_active:   self.monitoring_active,
      priority:            decode_priority(&self.priority)?,
      emergency_contacts:  decode_json(&self.emergency_contacts)?,
      notification_prefs:  decode_json(&self.notification_prefs)?,
      last_known_location: self
        .last_known_location
        .as_deref()
        .map(decode_json)
        .transpose()?,
      created_at:          decode_dt(&self.created_at)?,
    })
  }
}

/// Column list matching [`RawZone::from_row`].
pub const ZONE_COLUMNS: &str =
  "zone_id, subject_id, name, description, geometry, schedule, is_active, created_at";

/// Raw values read directly from a `safe_zones` row.
pub struct RawZone {
  pub zone_id:     String,
  pub subject_id:  String,
  pub name:        String,
  pub description: Option<String>,
  pub geometry:    String,
  pub schedule:    Option<String>,
  pub is_active:   bool,
  pub created_at:  String,
}

impl RawZone {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      zone_id:     row.get(0)?,
      subject_id:  row.get(1)?,
      name:        row.get(2)?,
      description: row.get(3)?,
      geometry:    row.get(4)?,
      schedule:    row.get(5)?,
      is_active:   row.get(6)?,
      created_at:  row.get(7)?,
    })
  }

  pub fn into_zone(self) -> Result<SafeZone> {
    Ok(SafeZone {
      zone_id:     decode_uuid(&self.zone_id)?,
      subject_id:  decode_uuid(&self.subject_id)?,
      name:        self.name,
      description: self.description,
      geometry:    decode_json(&self.geometry)?,
      is_active:   self.is_active,
      schedule:    self.schedule.as_deref().map(decode_json).transpose()?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}
