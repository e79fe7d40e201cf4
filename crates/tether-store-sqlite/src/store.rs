//! [`SqliteStore`], the SQLite implementation of [`MonitorStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{OptionalExtension as _, types::Value};
use uuid::Uuid;

use tether_core::{
  record::VerificationRecord,
  store::{MonitorStore, RecordQuery},
  subject::{LastKnownLocation, NewSubject, Priority, Subject},
  zone::{NewSafeZone, SafeZone},
};

use crate::{
  Error, Result,
  encode::{
    RawSubject, RawZone, SUBJECT_COLUMNS, ZONE_COLUMNS, decode_json, encode_dt,
    encode_json, encode_priority, encode_status, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tether monitor store backed by a single SQLite file.
///
/// Cloning shares the inner connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn load_zone(&self, zone_id: Uuid) -> Result<Option<SafeZone>> {
    let id_str = encode_uuid(zone_id);
    let raw: Option<RawZone> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ZONE_COLUMNS} FROM safe_zones WHERE zone_id = ?1"),
              rusqlite::params![id_str],
              RawZone::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawZone::into_zone).transpose()
  }
}

/// Build the `WHERE` clause and positional parameters for a record query.
fn record_filter(query: &RecordQuery) -> (String, Vec<Value>) {
  let mut conds: Vec<&'static str> = vec![];
  let mut params: Vec<Value> = vec![];

  if let Some(id) = query.subject_id {
    conds.push("subject_id = ?");
    params.push(Value::Text(encode_uuid(id)));
  }
  if let Some(v) = query.boundary_violation {
    conds.push("boundary_violation = ?");
    params.push(Value::Integer(i64::from(v)));
  }
  if let Some(after) = query.checked_after {
    conds.push("checked_at >= ?");
    params.push(Value::Text(encode_dt(after)));
  }
  if let Some(before) = query.checked_before {
    conds.push("checked_at <= ?");
    params.push(Value::Text(encode_dt(before)));
  }

  let where_clause = if conds.is_empty() {
    String::new()
  } else {
    format!("WHERE {}", conds.join(" AND "))
  };
  (where_clause, params)
}

// ─── MonitorStore impl ───────────────────────────────────────────────────────

impl MonitorStore for SqliteStore {
  type Error = Error;

  // ── Subjects ──────────────────────────────────────────────────────────────

  async fn add_subject(&self, input: NewSubject) -> Result<Subject> {
    let subject = Subject {
      subject_id:          Uuid::new_v4(),
      name:                input.name,
      device_id:           input.device_id,
      monitoring_active:   input.monitoring_active,
      priority:            input.priority,
      emergency_contacts:  input.emergency_contacts,
      notification_prefs:  input.notification_prefs,
      last_known_location: None,
      created_at:          Utc::now(),
    };

    let id_str       = encode_uuid(subject.subject_id);
    let name         = subject.name.clone();
    let device_id    = subject.device_id.clone();
    let active       = subject.monitoring_active;
    let priority_str = encode_priority(subject.priority).to_owned();
    let contacts_str = encode_json(&subject.emergency_contacts)?;
    let prefs_str    = encode_json(&subject.notification_prefs)?;
    let at_str       = encode_dt(subject.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subjects (
             subject_id, name, device_id, monitoring_active, priority,
             emergency_contacts, notification_prefs, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str,
            name,
            device_id,
            active,
            priority_str,
            contacts_str,
            prefs_str,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(subject)
  }

  async fn find_subject(&self, id: Uuid) -> Result<Option<Subject>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSubject> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE subject_id = ?1"),
              rusqlite::params![id_str],
              RawSubject::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSubject::into_subject).transpose()
  }

  async fn find_active_monitored(&self) -> Result<Vec<Subject>> {
    let raws: Vec<RawSubject> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUBJECT_COLUMNS} FROM subjects
           WHERE monitoring_active = 1
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map([], RawSubject::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSubject::into_subject).collect()
  }

  async fn set_monitoring(&self, id: Uuid, active: bool) -> Result<bool> {
    let id_str = encode_uuid(id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subjects SET monitoring_active = ?2 WHERE subject_id = ?1",
          rusqlite::params![id_str, active],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn set_priority(&self, id: Uuid, priority: Priority) -> Result<bool> {
    let id_str       = encode_uuid(id);
    let priority_str = encode_priority(priority).to_owned();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subjects SET priority = ?2 WHERE subject_id = ?1",
          rusqlite::params![id_str, priority_str],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn update_last_known_location(
    &self,
    id:       Uuid,
    location: LastKnownLocation,
  ) -> Result<()> {
    let id_str       = encode_uuid(id);
    let location_str = encode_json(&location)?;
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subjects SET last_known_location = ?2 WHERE subject_id = ?1",
          rusqlite::params![id_str, location_str],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::SubjectNotFound(id));
    }
    Ok(())
  }

  // ── Safe zones ────────────────────────────────────────────────────────────

  async fn add_zone(&self, input: NewSafeZone) -> Result<SafeZone> {
    let zone = SafeZone {
      zone_id:     Uuid::new_v4(),
      subject_id:  input.subject_id,
      name:        input.name,
      description: input.description,
      geometry:    input.geometry,
      is_active:   true,
      schedule:    input.schedule,
      created_at:  Utc::now(),
    };

    let zone_id_str    = encode_uuid(zone.zone_id);
    let subject_id_str = encode_uuid(zone.subject_id);
    let name           = zone.name.clone();
    let description    = zone.description.clone();
    let geometry_str   = encode_json(&zone.geometry)?;
    let schedule_str   = zone.schedule.as_ref().map(encode_json).transpose()?;
    let at_str         = encode_dt(zone.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO safe_zones (
             zone_id, subject_id, name, description, geometry, schedule,
             is_active, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
          rusqlite::params![
            zone_id_str,
            subject_id_str,
            name,
            description,
            geometry_str,
            schedule_str,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(zone)
  }

  async fn find_active_zones_for_subject(&self, subject_id: Uuid) -> Result<Vec<SafeZone>> {
    let id_str = encode_uuid(subject_id);

    let raws: Vec<RawZone> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ZONE_COLUMNS} FROM safe_zones
           WHERE subject_id = ?1 AND is_active = 1
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawZone::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawZone::into_zone).collect()
  }

  async fn set_zone_active(&self, zone_id: Uuid, active: bool) -> Result<Option<SafeZone>> {
    let id_str = encode_uuid(zone_id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE safe_zones SET is_active = ?2 WHERE zone_id = ?1",
          rusqlite::params![id_str, active],
        )?)
      })
      .await?;
    if changed == 0 {
      return Ok(None);
    }
    self.load_zone(zone_id).await
  }

  async fn delete_zone(&self, zone_id: Uuid) -> Result<Option<SafeZone>> {
    let Some(zone) = self.load_zone(zone_id).await? else {
      return Ok(None);
    };
    let id_str = encode_uuid(zone_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM safe_zones WHERE zone_id = ?1",
          rusqlite::params![id_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(Some(zone))
  }

  // ── Verification records (append-only) ───────────────────────────────────

  async fn append_record(&self, record: &VerificationRecord) -> Result<Uuid> {
    let record_id      = record.record_id;
    let record_id_str  = encode_uuid(record.record_id);
    let subject_id_str = encode_uuid(record.subject_id);
    let checked_at_str = encode_dt(record.checked_at);
    let violation      = record.boundary_violation;
    let status_str     = encode_status(record.status).to_owned();
    let record_json    = encode_json(record)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO verifications (
             record_id, subject_id, checked_at, boundary_violation, status,
             record_json
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            record_id_str,
            subject_id_str,
            checked_at_str,
            violation,
            status_str,
            record_json,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(record_id)
  }

  async fn get_record(&self, id: Uuid) -> Result<Option<VerificationRecord>> {
    let id_str = encode_uuid(id);
    let json: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT record_json FROM verifications WHERE record_id = ?1",
              rusqlite::params![id_str],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    json.as_deref().map(decode_json).transpose()
  }

  async fn list_records(&self, query: &RecordQuery) -> Result<Vec<VerificationRecord>> {
    let (where_clause, mut params) = record_filter(query);
    let bound = |n: usize| Value::Integer(i64::try_from(n).unwrap_or(i64::MAX));
    params.push(bound(query.limit.unwrap_or(100)));
    params.push(bound(query.offset.unwrap_or(0)));

    let rows: Vec<String> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT record_json FROM verifications
           {where_clause}
           ORDER BY checked_at DESC, rowid DESC
           LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.iter().map(|s| decode_json(s)).collect()
  }

  async fn count_records(&self, query: &RecordQuery) -> Result<u64> {
    let (where_clause, params) = record_filter(query);
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!("SELECT COUNT(*) FROM verifications {where_clause}"),
          rusqlite::params_from_iter(params),
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(count as u64)
  }
}
